//! Doctor — system diagnostics for GroupWarden.

use std::time::Duration;

use anyhow::Result;

use groupwarden::config::Config;
use groupwarden::store::RedisStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Ok,
    Warn,
    Err,
}

impl Severity {
    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Ok => "[ok]",
            Severity::Warn => "[warn]",
            Severity::Err => "[ERR]",
        }
    }
}

pub struct DiagItem {
    pub severity: Severity,
    pub category: &'static str,
    pub message: String,
}

pub(crate) async fn cmd_doctor(online: bool) -> Result<()> {
    println!("GroupWarden doctor\n");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            println!("[ERR] config: failed to load: {}", e);
            return Ok(());
        }
    };

    let mut diags = run_diagnostics(&config);
    if online {
        check_store_connectivity(&config, &mut diags).await;
    }

    for diag in &diags {
        println!("{} {}: {}", diag.severity.icon(), diag.category, diag.message);
    }

    let errors = diags.iter().filter(|d| d.severity == Severity::Err).count();
    let warnings = diags.iter().filter(|d| d.severity == Severity::Warn).count();
    println!();
    if errors == 0 && warnings == 0 {
        println!("Everything looks good.");
    } else {
        println!("Found {} error(s), {} warning(s)", errors, warnings);
    }
    Ok(())
}

pub fn run_diagnostics(config: &Config) -> Vec<DiagItem> {
    let mut diags = Vec::new();

    match config.validate() {
        Ok(()) => diags.push(DiagItem {
            severity: Severity::Ok,
            category: "config",
            message: "Configuration is valid".into(),
        }),
        Err(e) => diags.push(DiagItem {
            severity: Severity::Err,
            category: "config",
            message: e.to_string(),
        }),
    }

    if config.telegram.enabled && !config.telegram.token.is_empty() {
        diags.push(DiagItem {
            severity: Severity::Ok,
            category: "telegram",
            message: "Bot token configured".into(),
        });
    } else if !config.telegram.enabled {
        diags.push(DiagItem {
            severity: Severity::Warn,
            category: "telegram",
            message: "Transport disabled; the bot will not receive updates".into(),
        });
    }

    if config.classifier.api_key.is_empty() {
        diags.push(DiagItem {
            severity: Severity::Warn,
            category: "classifier",
            message: "No API key set; routing will rely on the fallback sweep only".into(),
        });
    } else {
        diags.push(DiagItem {
            severity: Severity::Ok,
            category: "classifier",
            message: format!("API key set, model {}", config.classifier.model),
        });
    }

    if !config.sweep.enabled {
        diags.push(DiagItem {
            severity: Severity::Warn,
            category: "sweep",
            message: "Mention sweep disabled; unanswered mentions will never notify".into(),
        });
    }

    diags.push(DiagItem {
        severity: Severity::Ok,
        category: "store",
        message: format!("Configured at {}", config.store.url),
    });

    diags
}

async fn check_store_connectivity(config: &Config, diags: &mut Vec<DiagItem>) {
    let connect = RedisStore::connect(&config.store.url);
    match tokio::time::timeout(Duration::from_secs(5), connect).await {
        Ok(Ok(_)) => diags.push(DiagItem {
            severity: Severity::Ok,
            category: "store",
            message: "Connection succeeded".into(),
        }),
        Ok(Err(e)) => diags.push(DiagItem {
            severity: Severity::Err,
            category: "store",
            message: format!("Connection failed: {}", e),
        }),
        Err(_) => diags.push(DiagItem {
            severity: Severity::Err,
            category: "store",
            message: "Connection timed out after 5s".into(),
        }),
    }
}
