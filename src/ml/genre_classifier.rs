use crate::ml::{EmbeddingProvider, TaskType};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

pub const UNKNOWN_GENRE: &str = "Unknown";

/// Labels embedded once at startup. Order is the tie-break order.
pub const GENRE_PROTOTYPES: [&str; 15] = [
    "Rock",
    "Pop",
    "Jazz",
    "Hip Hop",
    "Rap",
    "Electronic",
    "Classical",
    "R&B",
    "Indie",
    "Metal",
    "Country",
    "Folk",
    "Reggae",
    "Latin",
    "Soul",
];

/// `dot(a, b) / (|a| |b|)`. Zero when either side has zero norm or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Insertion-ordered genre label → prototype embedding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenreVectors {
    entries: Vec<(String, Vec<f32>)>,
}

impl GenreVectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-inserting a label replaces its vector in place.
    pub fn insert(&mut self, label: impl Into<String>, vector: Vec<f32>) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = vector,
            None => self.entries.push((label, vector)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&[f32]> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_slice())
    }

    /// Case-insensitive lookup of a request parameter, e.g. `hip hop` → `Hip Hop`.
    pub fn resolve(&self, param: &str) -> Option<&str> {
        let param = param.trim();
        self.entries
            .iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(param))
            .map(|(l, _)| l.as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Vec<f32>)> for GenreVectors {
    fn from_iter<I: IntoIterator<Item = (String, Vec<f32>)>>(iter: I) -> Self {
        let mut vectors = GenreVectors::new();
        for (label, vector) in iter {
            vectors.insert(label, vector);
        }
        vectors
    }
}

/// Label of the most similar prototype; the first one wins on ties.
pub fn assign_genre<'a>(embedding: &[f32], prototypes: &'a GenreVectors) -> &'a str {
    if embedding.is_empty() {
        return UNKNOWN_GENRE;
    }

    let mut best: Option<(&str, f32)> = None;
    for (label, vector) in prototypes.iter() {
        let similarity = cosine_similarity(embedding, vector);
        match best {
            Some((_, best_similarity)) if similarity <= best_similarity => {}
            _ => best = Some((label, similarity)),
        }
    }

    best.map(|(label, _)| label).unwrap_or(UNKNOWN_GENRE)
}

/// Embeds [`GENRE_PROTOTYPES`] in one batch. Any failure yields an empty set.
pub async fn compute_genre_vectors(provider: Option<&dyn EmbeddingProvider>) -> GenreVectors {
    let Some(provider) = provider else {
        debug!("Embeddings disabled, no genre vectors");
        return GenreVectors::new();
    };

    let labels: Vec<String> = GENRE_PROTOTYPES.iter().map(|g| g.to_string()).collect();
    match provider.embed(&labels, TaskType::SemanticSimilarity).await {
        Ok(vectors) if vectors.len() == labels.len() => {
            let genre_vectors: GenreVectors = labels
                .into_iter()
                .zip(vectors)
                .filter(|(_, v)| !v.is_empty())
                .collect();
            info!("Computed {} genre prototype vectors", genre_vectors.len());
            genre_vectors
        }
        Ok(vectors) => {
            warn!(
                "Genre prototype embedding returned {} vectors for {} labels",
                vectors.len(),
                labels.len()
            );
            GenreVectors::new()
        }
        Err(e) => {
            warn!("Failed to compute genre vectors: {}", e);
            GenreVectors::new()
        }
    }
}

/// Process-wide genre prototypes, set once and read-only afterwards.
#[derive(Debug, Default)]
pub struct GenreClassifier {
    vectors: OnceCell<GenreVectors>,
}

impl GenreClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vectors(vectors: GenreVectors) -> Self {
        let classifier = Self::new();
        // A fresh cell always accepts the first value.
        let _ = classifier.vectors.set(vectors);
        classifier
    }

    /// Computes the prototypes unless they are already set.
    pub async fn initialize(&self, provider: Option<&dyn EmbeddingProvider>) -> &GenreVectors {
        if let Some(vectors) = self.vectors.get() {
            return vectors;
        }
        let computed = compute_genre_vectors(provider).await;
        // A concurrent initializer may have won; keep whichever landed first.
        let _ = self.vectors.set(computed);
        self.vectors()
    }

    pub fn vectors(&self) -> &GenreVectors {
        static EMPTY: OnceCell<GenreVectors> = OnceCell::new();
        self.vectors
            .get()
            .unwrap_or_else(|| EMPTY.get_or_init(GenreVectors::new))
    }

    pub fn classify(&self, embedding: &[f32]) -> &str {
        assign_genre(embedding, self.vectors())
    }
}
