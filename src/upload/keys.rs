//! Store key layout
//!
//! Every key is namespaced by the configured platform prefix so several
//! environments or tenants can share one store.

use crate::config::KeyConfig;

#[derive(Debug, Clone)]
pub struct KeySpace {
    platform: String,
    service_name: String,
    tenant_name: String,
}

impl KeySpace {
    pub fn new(config: &KeyConfig) -> Self {
        Self {
            platform: config.platform.clone(),
            service_name: config.service_name.clone(),
            tenant_name: config.tenant_name.clone(),
        }
    }

    /// String key holding the session start metadata
    pub fn session(&self, upload_id: &str) -> String {
        format!("{}:multipart_storage:{}:metadata", self.platform, upload_id)
    }

    /// Hash key holding the chunk records, one field per chunk index
    pub fn chunks(&self, upload_id: &str) -> String {
        format!("{}:multipart_storage:hash:{}:chunks", self.platform, upload_id)
    }

    /// Sorted-set key of the deferred deletion queue
    pub fn delay_queue(&self) -> String {
        format!(
            "{}:{}:{}:storage:delay_job_queue",
            self.platform, self.service_name, self.tenant_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new(&KeyConfig {
            platform: "prod".to_string(),
            service_name: "upload".to_string(),
            tenant_name: "acme".to_string(),
        });

        assert_eq!(keys.session("S1"), "prod:multipart_storage:S1:metadata");
        assert_eq!(keys.chunks("S1"), "prod:multipart_storage:hash:S1:chunks");
        assert_eq!(keys.delay_queue(), "prod:upload:acme:storage:delay_job_queue");
    }
}
