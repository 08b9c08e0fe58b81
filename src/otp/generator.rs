use rand::{distributions::Uniform, rngs::OsRng, Rng};

use crate::config::OtpConfig;

/// Draws codes uniformly, with replacement, from a fixed alphabet.
///
/// Construction validates the configuration so a bad length or alphabet
/// fails at startup instead of on a request.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    length: usize,
    alphabet: Vec<char>,
}

impl CodeGenerator {
    pub fn new(length: usize, alphabet: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(length > 0, "code length must be positive");
        let alphabet: Vec<char> = alphabet.chars().collect();
        anyhow::ensure!(!alphabet.is_empty(), "code alphabet must not be empty");
        Ok(Self { length, alphabet })
    }

    pub fn from_config(cfg: &OtpConfig) -> anyhow::Result<Self> {
        Self::new(cfg.length, &cfg.alphabet)
    }

    pub fn generate(&self) -> String {
        let dist = Uniform::from(0..self.alphabet.len());
        OsRng
            .sample_iter(dist)
            .take(self.length)
            .map(|i| self.alphabet[i])
            .collect()
    }
}
