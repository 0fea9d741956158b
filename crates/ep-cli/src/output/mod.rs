//! Output formatting utilities for the CLI
//!
//! Tables for profiles, rendering of connection events, and coloured status
//! messages.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use ep_core::Profile;
use ep_probe::{Selection, SelectionMethod, UNREACHABLE_MS};
use ep_supervisor::{ConnectionEvent, ConnectionState, Severity};

/// Format the profile store as a table, marking the current profile
pub fn format_profiles(profiles: &[Profile], current_id: &str) -> String {
    if profiles.is_empty() {
        return "No profiles".to_string();
    }

    #[derive(Tabled)]
    struct ProfileRow {
        #[tabled(rename = "")]
        current: &'static str,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Server")]
        server: String,
        #[tabled(rename = "Listen")]
        listen: String,
        #[tabled(rename = "Routing")]
        routing: String,
        #[tabled(rename = "Endpoints")]
        endpoints: usize,
        #[tabled(rename = "Auto")]
        auto: &'static str,
        #[tabled(rename = "ID")]
        id: String,
    }

    let rows: Vec<ProfileRow> = profiles
        .iter()
        .map(|p| ProfileRow {
            current: if p.id == current_id { "*" } else { "" },
            name: truncate(&p.name, 24),
            server: truncate(&p.remote_server, 32),
            listen: p.listen_address.clone(),
            routing: p.routing_mode.to_string(),
            endpoints: ep_probe::parse_candidates(&p.endpoint_list).len(),
            auto: if p.auto_select_best { "yes" } else { "no" },
            id: truncate(&p.id, 11),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format one profile for `profile show`; the token is masked
pub fn format_profile(profile: &Profile) -> String {
    let token = if profile.auth_token.trim().is_empty() {
        "(none)"
    } else {
        "****"
    };
    let endpoints = ep_probe::parse_candidates(&profile.endpoint_list);

    let mut output = String::new();
    output.push_str(&format!("Name:       {}\n", profile.name));
    output.push_str(&format!("ID:         {}\n", profile.id));
    output.push_str(&format!("Server:     {}\n", or_none(&profile.remote_server)));
    output.push_str(&format!("Listen:     {}\n", or_none(&profile.listen_address)));
    output.push_str(&format!("Token:      {}\n", token));
    output.push_str(&format!("Routing:    {}\n", profile.routing_mode));
    output.push_str(&format!(
        "Auto best:  {}\n",
        if profile.auto_select_best { "yes" } else { "no" }
    ));
    output.push_str(&format!("Endpoints:  {}", endpoints.len()));
    for endpoint in endpoints {
        output.push_str(&format!("\n  {}", endpoint));
    }
    output
}

/// Describe a selection result in one line
pub fn format_selection(selection: &Selection) -> String {
    match (&selection.endpoint, selection.method) {
        (None, _) => "No candidates".to_string(),
        (Some(endpoint), SelectionMethod::Degraded) => {
            format!("{} (nothing reachable, using first listed)", endpoint)
        }
        (Some(endpoint), _) if selection.latency_ms >= UNREACHABLE_MS => {
            format!("{} unreachable", endpoint)
        }
        (Some(endpoint), method) => format!(
            "{} {:.0}ms ({})",
            endpoint,
            selection.latency_ms,
            method_label(method)
        ),
    }
}

fn method_label(method: SelectionMethod) -> &'static str {
    match method {
        SelectionMethod::Empty => "empty",
        SelectionMethod::Single => "single candidate",
        SelectionMethod::FastPath => "fast path",
        SelectionMethod::Stable => "most stable",
        SelectionMethod::Degraded => "degraded",
        SelectionMethod::Tier1Fallback => "coarse scan",
    }
}

/// Render a connection event to the terminal
pub fn print_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Log { text, severity } => match severity {
            Severity::Success => print_colored(Color::Green, text),
            Severity::Failure => print_colored(Color::Red, text),
            Severity::Info => println!("{}", text),
        },
        ConnectionEvent::Status(status) => print_info(&format!("Status: {}", status)),
        ConnectionEvent::Selection(text) => print_info(&format!("Endpoint: {}", text)),
        ConnectionEvent::Identity(report) => {
            print_info("Exit identity:");
            for line in report.lines() {
                println!("  {}", line);
            }
        }
        ConnectionEvent::StateChanged(ConnectionState::Running) => print_success("Connected"),
        ConnectionEvent::StateChanged(state) => tracing::debug!("State: {}", state),
    }
}

fn or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        "(none)"
    } else {
        value
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_colored(color: Color, msg: &str) {
    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(color),
        Print(msg),
        ResetColor,
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix, to stderr
pub fn print_error(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow, to stderr
pub fn print_warning(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
