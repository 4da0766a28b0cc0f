use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use writingtools_appcore::service::console_collaborators;
use writingtools_appcore::{AppService, ServiceOptions};
use writingtools_core::config::ProviderKind;
use writingtools_core::types::Selection;
use writingtools_runtime::cloud_sync::{FileKeyValueStore, RemoteKeyValueStore};
use writingtools_runtime::secrets::{Credentials, SecretKey};

const USAGE: &str = "usage: writingtools <command name | list | models | custom <change>>  (selection on stdin)

environment:
  WRITINGTOOLS_HOME      documents root (default: ~/Documents)
  WRITINGTOOLS_PROVIDER  gemini | openai | ollama | local; saved as the active backend
  WRITINGTOOLS_SYNC_DIR  folder used as the cloud command store
  GEMINI_API_KEY, OPENAI_API_KEY  override the keyring for this run";

fn documents_root() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("WRITINGTOOLS_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .context("neither WRITINGTOOLS_HOME nor HOME is set")?;
    Ok(PathBuf::from(home).join("Documents"))
}

fn credentials() -> Credentials {
    let mut creds = Credentials::from_keyring();
    for (var, key) in [
        ("GEMINI_API_KEY", SecretKey::GeminiApiKey),
        ("OPENAI_API_KEY", SecretKey::OpenAiCompatibleApiKey),
    ] {
        if let Ok(value) = std::env::var(var) {
            creds.set(key, value);
        }
    }
    creds
}

fn read_selection() -> anyhow::Result<Selection> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("read selection from stdin")?;
    Ok(Selection::text(text))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(verb) = args.first() else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    };

    let remote: Option<Arc<dyn RemoteKeyValueStore>> = match std::env::var("WRITINGTOOLS_SYNC_DIR") {
        Ok(dir) => Some(Arc::new(FileKeyValueStore::new(dir))),
        Err(_) => None,
    };
    let options = ServiceOptions {
        remote,
        credentials: Some(credentials()),
        ..Default::default()
    };
    let svc = AppService::open(documents_root()?, console_collaborators(), options)?;
    let report = svc.startup().await?;
    log::debug!("startup: {report:?}");

    if let Ok(value) = std::env::var("WRITINGTOOLS_PROVIDER") {
        let kind = ProviderKind::parse(&value)
            .with_context(|| format!("unknown provider {value:?}"))?;
        let mut settings = svc.settings();
        if settings.active_provider != kind {
            settings.active_provider = kind;
            svc.save_settings(settings).await?;
        }
    }

    let result = match verb.as_str() {
        "list" => {
            for cmd in svc.commands() {
                let kind = if cmd.is_built_in { "built-in" } else { "custom" };
                println!("{}\t{}\t{kind}", cmd.id, cmd.name);
            }
            return Ok(ExitCode::SUCCESS);
        }
        "models" => {
            let status = svc.local_models().state();
            for d in svc.local_models().catalog() {
                let marker = if d.id == status.descriptor_id { "*" } else { " " };
                let vision = if d.vision { " (vision)" } else { "" };
                println!("{marker} {}\t{}{vision}", d.id, d.display_name);
            }
            println!("selected: {:?}", status.state);
            return Ok(ExitCode::SUCCESS);
        }
        "custom" => {
            let change = args[1..].join(" ");
            svc.run_custom(&change, &read_selection()?).await
        }
        _ => {
            let name = args.join(" ");
            let Some(cmd) = svc.find_command(&name) else {
                eprintln!("no command named {name:?}; try `writingtools list`");
                return Ok(ExitCode::from(2));
            };
            svc.run_command(&cmd, &read_selection()?).await
        }
    };

    // Failures were already shown by the error channel.
    Ok(match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}
