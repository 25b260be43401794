use birdmap::embedding::{EmbedError, Embedder};

/// Returns the same vector for every input; optionally fails on the n-th call.
pub struct ConstantEmbedder {
    pub vector: Vec<f32>,
    pub fail_on_call: Option<usize>,
    pub calls: usize,
    pub seen_lengths: Vec<usize>,
}

impl ConstantEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            fail_on_call: None,
            calls: 0,
            seen_lengths: Vec::new(),
        }
    }

    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }
}

impl Embedder for ConstantEmbedder {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn embedding_dim(&self) -> usize {
        self.vector.len()
    }

    fn embed(&mut self, samples: &[f32]) -> Result<Vec<f32>, EmbedError> {
        self.calls += 1;
        self.seen_lengths.push(samples.len());
        if self.fail_on_call == Some(self.calls) {
            return Err(EmbedError::Inference("stub failure".to_string()));
        }
        Ok(self.vector.clone())
    }
}
