//! Select command implementation

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{format_selection, print_info, print_success, print_warning};
use ep_core::config::AppConfig;
use ep_core::ProfileStore;
use ep_probe::{
    parse_candidates, EndpointSelector, SelectionMethod, SelectionPhase, UNREACHABLE_MS,
};

/// Run the endpoint selector over a list file or the current profile's list
pub async fn select_command(
    config: &AppConfig,
    profiles_path: &Path,
    file: Option<&PathBuf>,
) -> Result<()> {
    let candidate_text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read endpoint list: {:?}", path))?,
        None => {
            let store = ProfileStore::load(profiles_path)?;
            let profile = store.current();
            print_info(&format!("Using endpoints from profile '{}'", profile.name));
            profile.endpoint_list.clone()
        }
    };

    let count = parse_candidates(&candidate_text).len();
    if count == 0 {
        print_warning("No candidate endpoints to test");
        return Ok(());
    }
    print_info(&format!("Testing {} candidate(s)", count));

    let selector = EndpointSelector::with_tcp_probe(config.selector.clone());
    let progress = |phase: SelectionPhase| print_info(&format!("{}...", capitalize(phase.label())));
    let selection = selector.select_best(&candidate_text, Some(&progress)).await;

    let summary = format_selection(&selection);
    let usable = selection.latency_ms < UNREACHABLE_MS
        && !matches!(
            selection.method,
            SelectionMethod::Degraded | SelectionMethod::Empty
        );
    if usable {
        print_success(&summary);
    } else {
        print_warning(&summary);
    }
    Ok(())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
