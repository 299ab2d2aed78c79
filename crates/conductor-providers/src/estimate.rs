use crate::config::ModelPricing;
use std::sync::Arc;
use tracing::debug;

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u64;
}

/// Approximates BPE tokenization without a vocabulary.
///
/// Each run of alphanumeric characters costs one token per started group of
/// four characters, each run of punctuation costs one token, and whitespace is
/// free. The result is never below `chars / 4`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> u64 {
        #[derive(PartialEq)]
        enum Run {
            None,
            Word,
            Punct,
        }

        let mut tokens: u64 = 0;
        let mut word_len: u64 = 0;
        let mut run = Run::None;
        let mut chars: u64 = 0;

        for c in text.chars() {
            chars += 1;
            if c.is_alphanumeric() || c == '_' {
                word_len += 1;
                run = Run::Word;
                continue;
            }

            if run == Run::Word {
                tokens += word_len.div_ceil(4);
                word_len = 0;
            }
            if c.is_whitespace() {
                run = Run::None;
            } else if run != Run::Punct {
                tokens += 1;
                run = Run::Punct;
            }
        }
        if run == Run::Word {
            tokens += word_len.div_ceil(4);
        }

        tokens.max(chars / 4)
    }
}

/// Token and cost estimates used by the planner.
#[derive(Clone)]
pub struct Estimator {
    counter: Arc<dyn TokenCounter>,
    output_ratio: f64,
}

impl Estimator {
    /// An estimator expecting `output_ratio` of `max_tokens` as output.
    pub fn new(counter: Arc<dyn TokenCounter>, output_ratio: f64) -> Self {
        Self {
            counter,
            output_ratio,
        }
    }

    /// Tokens in a rendered prompt.
    pub fn input_tokens(&self, prompt: &str) -> u64 {
        let tokens = self.counter.count(prompt);
        debug!(chars = prompt.len(), tokens, "Estimated input tokens");
        tokens
    }

    /// `ceil(max_tokens × output_ratio)`.
    pub fn output_tokens(&self, max_tokens: u32) -> u64 {
        (f64::from(max_tokens) * self.output_ratio).ceil() as u64
    }

    /// Cost of a call; local providers and unpriced models cost nothing.
    pub fn cost(
        &self,
        pricing: Option<ModelPricing>,
        is_local: bool,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        if is_local {
            return 0.0;
        }
        pricing
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicTokenCounter), 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_counts_words_and_punctuation() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("hi"), 1);
        // "hello" = 2, "," = 1, "world" = 2, "!" = 1
        assert_eq!(counter.count("hello, world!"), 6);
        // punctuation runs collapse
        assert_eq!(counter.count("wait..."), 2);
    }

    #[test]
    fn test_long_words_split_every_four_chars() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
        assert_eq!(counter.count("internationalization"), 5);
    }

    #[test]
    fn test_never_below_quarter_of_chars() {
        let counter = HeuristicTokenCounter;
        let spaces_and_word = format!("{}a", " ".repeat(40));
        assert_eq!(counter.count(&spaces_and_word), 10);
    }

    #[test]
    fn test_output_tokens_rounds_up() {
        let estimator = Estimator::default();
        assert_eq!(estimator.output_tokens(2048), 1024);
        assert_eq!(estimator.output_tokens(3), 2);

        let estimator = Estimator::new(Arc::new(HeuristicTokenCounter), 0.25);
        assert_eq!(estimator.output_tokens(1000), 250);
    }

    #[test]
    fn test_cost_is_zero_for_local_or_unpriced() {
        let estimator = Estimator::default();
        let price = Some(ModelPricing::new(3.0, 15.0));
        assert_eq!(estimator.cost(price, true, 1_000_000, 1_000_000), 0.0);
        assert_eq!(estimator.cost(None, false, 1_000_000, 1_000_000), 0.0);
        let cost = estimator.cost(price, false, 1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 1e-9);
    }
}
