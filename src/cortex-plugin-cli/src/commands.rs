//! Plugin subcommands.

use anyhow::{Result, bail};
use serde::Serialize;

use cortex_plugin_host::{Identity, LoadOutcome, PluginManager, RegistryListing};

/// Plugin subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum PluginCommand {
    /// Install a plugin by registry name or `owner/repo/name[@branch]`
    #[command(visible_alias = "install")]
    Add { reference: String },

    /// Remove an installed plugin
    #[command(visible_aliases = ["rm", "uninstall"])]
    Remove { reference: String },

    /// Update one plugin, or every installed plugin
    Update { reference: Option<String> },

    /// List loaded plugins
    #[command(visible_alias = "ls")]
    Loaded {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the persisted install list
    Installed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Browse the plugin registry
    Registry {
        /// Show a single entry
        name: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Registry entry for display.
#[derive(Debug, Serialize)]
struct RegistryRow {
    name: String,
    title: String,
    description: String,
    reference: Option<String>,
    link: Option<String>,
    min_version: Option<String>,
    loaded: bool,
    compatible: bool,
}

impl From<RegistryListing> for RegistryRow {
    fn from(listing: RegistryListing) -> Self {
        let identity = listing.entry.identity().ok();
        Self {
            reference: identity.as_ref().map(Identity::to_string),
            link: identity.as_ref().map(Identity::link),
            name: listing.entry.name,
            title: listing.entry.title,
            description: listing.entry.description,
            min_version: listing.entry.min_version,
            loaded: listing.loaded,
            compatible: listing.compatible,
        }
    }
}

impl PluginCommand {
    /// Run the command against an initialized manager.
    pub async fn run(self, manager: &PluginManager) -> Result<()> {
        match self {
            Self::Add { reference } => run_add(manager, &reference).await,
            Self::Remove { reference } => run_remove(manager, &reference).await,
            Self::Update {
                reference: Some(reference),
            } => run_update(manager, &reference).await,
            Self::Update { reference: None } => run_update_all(manager).await,
            Self::Loaded { json } => run_loaded(manager, json).await,
            Self::Installed { json } => run_installed(manager, json).await,
            Self::Registry { name, json } => run_registry(manager, name.as_deref(), json).await,
        }
    }
}

async fn run_add(manager: &PluginManager, reference: &str) -> Result<()> {
    let (identity, outcome) = manager.add_reference(reference).await?;
    println!("Installed {}", identity);
    report_outcome(&identity, &outcome);
    Ok(())
}

async fn run_remove(manager: &PluginManager, reference: &str) -> Result<()> {
    let identity = manager.remove_reference(reference).await?;
    println!("Removed {}", identity);
    Ok(())
}

async fn run_update(manager: &PluginManager, reference: &str) -> Result<()> {
    let (identity, outcome) = manager.update_reference(reference).await?;
    println!("Updated {}", identity);
    report_outcome(&identity, &outcome);
    Ok(())
}

async fn run_update_all(manager: &PluginManager) -> Result<()> {
    let results = manager.update_all().await;
    if results.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }

    let mut failures = 0;
    for (identity, result) in &results {
        match result {
            Ok(outcome) => {
                println!("Updated {}", identity);
                report_outcome(identity, outcome);
            }
            Err(e) => {
                failures += 1;
                eprintln!("Failed to update {}: {}", identity, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} plugin(s) failed to update", failures, results.len());
    }
    Ok(())
}

async fn run_loaded(manager: &PluginManager, json: bool) -> Result<()> {
    let loaded = manager.loaded_plugins().await;
    print_list(
        loaded.iter().map(Identity::to_string).collect(),
        json,
        empty_loaded_message(manager.config().enable_plugins),
        "Loaded Plugins:",
    )
}

fn empty_loaded_message(enable_plugins: bool) -> &'static str {
    if enable_plugins {
        "No plugins loaded."
    } else {
        "Plugin loading is disabled. Set `enable_plugins = true` to load plugins."
    }
}

async fn run_installed(manager: &PluginManager, json: bool) -> Result<()> {
    print_list(
        manager.installed_plugins().await,
        json,
        "No plugins installed.",
        "Installed Plugins:",
    )
}

async fn run_registry(manager: &PluginManager, name: Option<&str>, json: bool) -> Result<()> {
    let mut rows: Vec<RegistryRow> = manager
        .registry_listing()
        .await
        .into_iter()
        .map(RegistryRow::from)
        .collect();

    if let Some(name) = name {
        let suggestions = close_matches(name, rows.iter().map(|row| row.name.as_str()));
        rows.retain(|row| row.name == name);
        if rows.is_empty() {
            if suggestions.is_empty() {
                bail!("No registry entry named '{}'", name);
            }
            bail!(
                "No registry entry named '{}'. Did you mean: {}?",
                name,
                suggestions.join(", ")
            );
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("The plugin registry is empty or unreachable.");
        return Ok(());
    }

    for row in &rows {
        println!("{}", format_registry_row(row));
    }
    Ok(())
}

fn print_list(items: Vec<String>, json: bool, empty: &str, header: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("{}", empty);
    } else {
        println!("{}", header);
        println!("{}", "-".repeat(60));
        for item in &items {
            println!("  {}", item);
        }
        println!("\nTotal: {} plugin(s)", items.len());
    }
    Ok(())
}

fn report_outcome(identity: &Identity, outcome: &LoadOutcome) {
    match outcome {
        LoadOutcome::Loaded => println!("Loaded {}", identity),
        LoadOutcome::Disabled => {
            println!("Plugin loading is disabled; {} will not be active", identity.name)
        }
        LoadOutcome::Failed(e) => eprintln!("Installed but failed to load: {}", e),
    }
}

const SUGGESTION_CUTOFF: f32 = 0.6;
const MAX_SUGGESTIONS: usize = 3;

/// Registry names similar to `name`, best first.
fn close_matches<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut scored: Vec<(f32, &str)> = candidates
        .filter(|candidate| *candidate != name)
        .map(|candidate| (similarity_ratio(name, candidate), candidate))
        .filter(|(ratio, _)| *ratio >= SUGGESTION_CUTOFF)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, candidate)| candidate.to_string())
        .collect()
}

fn similarity_ratio(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f32 / max_len as f32
}

// Case-insensitive.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        previous = current;
    }
    previous[b.len()]
}

fn format_registry_row(row: &RegistryRow) -> String {
    let title = if row.title.is_empty() {
        row.name.as_str()
    } else {
        row.title.as_str()
    };

    let mut status = Vec::new();
    if row.loaded {
        status.push("loaded".to_string());
    }
    if !row.compatible {
        status.push(format!(
            "requires {}",
            row.min_version.as_deref().unwrap_or("a newer version")
        ));
    }

    let mut line = format!("{} ({})", title, row.name);
    if !status.is_empty() {
        line.push_str(&format!(" [{}]", status.join(", ")));
    }
    if !row.description.is_empty() {
        line.push_str(&format!("\n    {}", row.description));
    }
    if let Some(link) = &row.link {
        line.push_str(&format!("\n    {}", link));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> RegistryRow {
        RegistryRow {
            name: "dragory".to_string(),
            title: "Dragory".to_string(),
            description: "Moderation helpers".to_string(),
            reference: Some("kyb3r/modmail-plugins/dragory@master".to_string()),
            link: Some("https://github.com/kyb3r/modmail-plugins/tree/master/dragory".to_string()),
            min_version: Some("9.0.0".to_string()),
            loaded: false,
            compatible: true,
        }
    }

    #[test]
    fn test_format_registry_row() {
        let text = format_registry_row(&row());
        assert!(text.starts_with("Dragory (dragory)\n"));
        assert!(text.contains("Moderation helpers"));
        assert!(text.contains("/tree/master/dragory"));
    }

    #[test]
    fn test_format_registry_row_status() {
        let mut row = row();
        row.title.clear();
        row.loaded = true;
        row.compatible = false;
        let text = format_registry_row(&row);
        assert!(text.starts_with("dragory (dragory) [loaded, requires 9.0.0]"));
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("Dragory", "dragory"), 0);
    }

    #[test]
    fn test_close_matches() {
        let names = ["dragory", "announcement", "autorole", "translator", "dragon"];

        assert_eq!(
            close_matches("dragori", names.into_iter()),
            vec!["dragory", "dragon"]
        );
        assert_eq!(close_matches("autoroles", names.into_iter()), vec!["autorole"]);
        assert!(close_matches("zzz", names.into_iter()).is_empty());
        assert!(close_matches("dragory", ["dragory"].into_iter()).is_empty());
    }

    #[test]
    fn test_empty_loaded_message_reports_disabled_loading() {
        assert_eq!(empty_loaded_message(true), "No plugins loaded.");
        assert!(empty_loaded_message(false).contains("disabled"));
    }
}
