use actix_web::{web, Scope};

use crate::handlers::{
    admin_config, debug_info, health_check, history_config, listen_config,
    recommendations_config, songs_config,
};

/// Configure all routes for the API
pub fn api_routes() -> Scope {
    web::scope("/api")
        .service(health_check)
        .service(debug_info)
        .configure(listen_config)
        .configure(recommendations_config)
        .configure(songs_config)
        .configure(history_config)
        .configure(admin_config)
}
