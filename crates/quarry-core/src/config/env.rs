use super::{Config, Secret, SubprocessConfig};

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_STORE_PATH") {
            self.store.path = v;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid QUARRY_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_DIMENSION")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.dimension = n;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.batch_size = n;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.concurrency = n;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_DEVICE") {
            self.embedding.device = v;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_COMMAND") {
            let sub = self.embedding.subprocess.get_or_insert_with(|| SubprocessConfig {
                command: String::new(),
                args: Vec::new(),
                timeout_secs: 60,
            });
            sub.command = v;
        }
        if let Ok(v) = std::env::var("QUARRY_INDEX_MAX_FILE_BYTES")
            && let Ok(n) = v.parse::<u64>()
        {
            self.index.max_file_bytes = n;
        }
        if let Ok(v) = std::env::var("QUARRY_RETRIEVAL_TOP_K")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.top_k = n;
        }
        if let Ok(v) = std::env::var("QUARRY_RETRIEVAL_SCORE_THRESHOLD")
            && let Ok(t) = v.parse::<f32>()
        {
            self.retrieval.score_threshold = t.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("QUARRY_OPENAI_API_KEY")
            && !v.is_empty()
        {
            self.secrets.openai_api_key = Some(Secret::new(v));
        }
    }
}
