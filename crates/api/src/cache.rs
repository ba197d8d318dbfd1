use dashmap::DashMap;
use query::Answer;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Answers keyed by model and question
pub struct Cache {
    answers: Arc<DashMap<String, Answer>>,
    max_entries: usize,
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            answers: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn set_answer(&self, model: &str, question: &str, answer: Answer) {
        if self.answers.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self.answers.iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.answers.remove(&key);
            }
        }
        let key = self.key(model, question);
        self.answers.insert(key, answer);
    }

    pub fn get_answer(&self, model: &str, question: &str) -> Option<Answer> {
        let key = self.key(model, question);
        self.answers.get(&key).map(|r| r.value().clone())
    }

    fn key(&self, model: &str, question: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(question.trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            answers_cached: self.answers.len(),
            max_entries: self.max_entries,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub answers_cached: usize,
    pub max_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &str) -> Answer {
        Answer {
            answer: text.to_string(),
            sources: Vec::new(),
        }
    }

    #[test]
    fn test_keyed_by_model_and_question() {
        let cache = Cache::new(10);
        cache.set_answer("gpt-3.5-turbo", "What is Kysely?", answer("a builder"));

        assert_eq!(cache.get_answer("gpt-3.5-turbo", " What is Kysely? ").unwrap().answer, "a builder");
        assert!(cache.get_answer("gpt-4-turbo", "What is Kysely?").is_none());
    }

    #[test]
    fn test_evicts_when_full() {
        let cache = Cache::new(8);
        for i in 0..8 {
            cache.set_answer("m", &format!("q{}", i), answer("a"));
        }
        assert_eq!(cache.stats().answers_cached, 8);

        cache.set_answer("m", "one more", answer("b"));
        assert_eq!(cache.stats().answers_cached, 7);
        assert!(cache.get_answer("m", "one more").is_some());
    }
}
