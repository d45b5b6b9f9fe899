//! Record embeddings
//!
//! An [`Embedder`] turns a record title into a fixed-size vector that is
//! stored next to the record.

/// Produces vectors for record text
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Returns all-zero vectors of a fixed dimension
///
/// Stands in until a real model is wired up.
#[derive(Debug, Clone, Copy)]
pub struct ZeroEmbedder {
    dimension: usize,
}

impl ZeroEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for ZeroEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, _text: &str) -> Vec<f32> {
        vec![0.0; self.dimension]
    }
}
