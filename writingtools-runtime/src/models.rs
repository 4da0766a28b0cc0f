use writingtools_core::model::{LocalModelDescriptor, ModelFile};

// Weights come straight from the Hugging Face hub.
const HUB: &str = "https://huggingface.co";

fn hub_files(repo: &str, names: &[&str]) -> Vec<ModelFile> {
    names
        .iter()
        .map(|name| ModelFile {
            name: (*name).to_string(),
            url: format!("{HUB}/{repo}/resolve/main/{name}"),
            sha256: None,
            size_bytes: None,
        })
        .collect()
}

const TEXT_FILES: &[&str] = &[
    "config.json",
    "tokenizer.json",
    "tokenizer_config.json",
    "model.safetensors",
];

const VISION_FILES: &[&str] = &[
    "config.json",
    "tokenizer.json",
    "tokenizer_config.json",
    "preprocessor_config.json",
    "model.safetensors",
];

pub const DEFAULT_LOCAL_MODEL_ID: &str = "mlx-community/Llama-3.2-3B-Instruct-4bit";

pub fn local_model_catalog() -> Vec<LocalModelDescriptor> {
    vec![
        LocalModelDescriptor {
            id: DEFAULT_LOCAL_MODEL_ID.into(),
            display_name: "Llama 3.2 3B Instruct".into(),
            vision: false,
            files: hub_files(DEFAULT_LOCAL_MODEL_ID, TEXT_FILES),
        },
        LocalModelDescriptor {
            id: "mlx-community/Qwen2.5-3B-Instruct-4bit".into(),
            display_name: "Qwen 2.5 3B Instruct".into(),
            vision: false,
            files: hub_files("mlx-community/Qwen2.5-3B-Instruct-4bit", TEXT_FILES),
        },
        LocalModelDescriptor {
            id: "mlx-community/Qwen2.5-VL-3B-Instruct-4bit".into(),
            display_name: "Qwen 2.5 VL 3B (vision)".into(),
            vision: true,
            files: hub_files("mlx-community/Qwen2.5-VL-3B-Instruct-4bit", VISION_FILES),
        },
    ]
}

pub fn find_descriptor<'a>(
    catalog: &'a [LocalModelDescriptor],
    id: &str,
) -> Option<&'a LocalModelDescriptor> {
    catalog.iter().find(|d| d.id == id)
}
