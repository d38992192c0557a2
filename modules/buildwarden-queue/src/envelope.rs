use serde::{Deserialize, Serialize};

/// The JSON document producers enqueue. `build_id` is required; unknown keys
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub build_id: i64,
    #[serde(default)]
    pub ignore_filters: bool,
}

impl JobEnvelope {
    pub fn new(build_id: i64) -> Self {
        Self {
            build_id,
            ignore_filters: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_filters_defaults_to_false() {
        let envelope: JobEnvelope = serde_json::from_str(r#"{"build_id": 42}"#).unwrap();
        assert_eq!(envelope, JobEnvelope::new(42));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let envelope: JobEnvelope =
            serde_json::from_str(r#"{"build_id": 7, "ignore_filters": true, "extra": 1}"#).unwrap();
        assert!(envelope.ignore_filters);
    }

    #[test]
    fn missing_build_id_is_rejected() {
        assert!(serde_json::from_str::<JobEnvelope>(r#"{"ignore_filters": true}"#).is_err());
    }
}
