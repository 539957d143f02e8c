//! Reference classifier used by the example server.
//!
//! It scores each input by the byte histogram over its label set and sleeps
//! for a latency that grows with the batch length, which is enough to
//! observe batching behaviour without a real model.

use crate::{Error, Inference, Output, Prediction};
use std::{thread, time::Duration};

/// Byte histogram classifier.
pub struct Histogram {
    labels: Vec<String>,
    top_k: usize,
    fixed_cost: Duration,
    per_item_cost: Duration,
}

impl Histogram {
    /// Create a classifier over `labels`. Fails on an empty label set.
    pub fn new<I, S>(labels: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(Error::Build("histogram needs at least one label".to_string()));
        }
        Ok(Histogram {
            top_k: labels.len(),
            labels,
            fixed_cost: Duration::from_millis(0),
            per_item_cost: Duration::from_millis(0),
        })
    }

    /// Number of ranked predictions returned per input.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Latency paid once per batch.
    pub fn fixed_cost(mut self, fixed_cost: Duration) -> Self {
        self.fixed_cost = fixed_cost;
        self
    }

    /// Latency paid per batch member.
    pub fn per_item_cost(mut self, per_item_cost: Duration) -> Self {
        self.per_item_cost = per_item_cost;
        self
    }

    fn classify(&self, input: &[u8]) -> Output {
        let classes = self.labels.len();
        let mut counts = vec![0usize; classes];
        for &byte in input {
            counts[byte as usize % classes] += 1;
        }
        let total = input.len();
        let mut ranked: Vec<(usize, f32)> = counts
            .into_iter()
            .enumerate()
            .map(|(class, count)| {
                let score = if total == 0 {
                    1.0 / classes as f32
                } else {
                    count as f32 / total as f32
                };
                (class, score)
            })
            .collect();
        // stable, so ties keep label order
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(self.top_k)
            .map(|(class, score)| Prediction::new(self.labels[class].clone(), score))
            .collect()
    }
}

impl Inference for Histogram {
    fn infer(&self, inputs: &[Vec<u8>]) -> Result<Vec<Output>, Error> {
        let cost = self.fixed_cost + self.per_item_cost * inputs.len() as u32;
        if cost > Duration::from_secs(0) {
            thread::sleep(cost);
        }
        Ok(inputs.iter().map(|input| self.classify(input)).collect())
    }

    fn reentrant(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_ranking() {
        let model = Histogram::new(vec!["even", "odd"]).unwrap();
        let outputs = model.infer(&[vec![1, 3, 5, 2], vec![]]).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0][0], Prediction::new("odd", 0.75));
        assert_eq!(outputs[0][1], Prediction::new("even", 0.25));
        // empty input falls back to a uniform distribution
        assert_eq!(outputs[1][0], Prediction::new("even", 0.5));
        assert_eq!(outputs[1][1], Prediction::new("odd", 0.5));
    }

    #[test]
    fn test_top_k() {
        let model = Histogram::new(vec!["a", "b", "c"]).unwrap().top_k(1);
        let outputs = model.infer(&[vec![2, 2, 0]]).unwrap();
        assert_eq!(outputs[0], vec![Prediction::new("c", 2.0 / 3.0)]);
    }

    #[test]
    fn test_latency_grows_with_batch() {
        let model = Histogram::new(vec!["a"])
            .unwrap()
            .per_item_cost(Duration::from_millis(10));
        let now = Instant::now();
        model.infer(&[vec![], vec![], vec![]]).unwrap();
        assert!(now.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_empty_labels() {
        assert!(Histogram::new(Vec::<String>::new()).is_err());
    }
}
