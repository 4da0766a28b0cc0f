use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under the documents root that holds everything this app writes.
pub const STORAGE_NAMESPACE: &str = "WritingTools";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// One on-device model variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub vision: bool,
    pub files: Vec<ModelFile>,
}

impl LocalModelDescriptor {
    /// The id with every character outside `[A-Za-z0-9._-]` replaced by `_`.
    pub fn sanitized_id(&self) -> String {
        sanitize_model_id(&self.id)
    }

    pub fn storage_dir(&self, documents_root: &Path) -> PathBuf {
        documents_root
            .join(STORAGE_NAMESPACE)
            .join("models")
            .join(self.sanitized_id())
    }

    pub fn expected_bytes(&self) -> Option<u64> {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

pub fn sanitize_model_id(id: &str) -> String {
    let s: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Never produce a path component that walks upward.
    if s.chars().all(|c| c == '.') {
        s.replace('.', "_")
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> LocalModelDescriptor {
        LocalModelDescriptor {
            id: id.into(),
            display_name: "Test".into(),
            vision: false,
            files: vec![
                ModelFile {
                    name: "a".into(),
                    url: "https://example.com/a".into(),
                    sha256: None,
                    size_bytes: Some(10),
                },
                ModelFile {
                    name: "b".into(),
                    url: "https://example.com/b".into(),
                    sha256: None,
                    size_bytes: Some(5),
                },
            ],
        }
    }

    #[test]
    fn sanitizes_hub_style_ids() {
        assert_eq!(
            sanitize_model_id("mlx-community/Llama-3.2-3B-Instruct-4bit"),
            "mlx-community_Llama-3.2-3B-Instruct-4bit"
        );
        assert_eq!(sanitize_model_id(".."), "__");
    }

    #[test]
    fn storage_dir_follows_layout() {
        let d = descriptor("org/model");
        let dir = d.storage_dir(Path::new("/docs"));
        assert_eq!(dir, PathBuf::from("/docs/WritingTools/models/org_model"));
    }

    #[test]
    fn expected_bytes_needs_every_size() {
        let mut d = descriptor("x");
        assert_eq!(d.expected_bytes(), Some(15));
        d.files[1].size_bytes = None;
        assert_eq!(d.expected_bytes(), None);
    }
}
