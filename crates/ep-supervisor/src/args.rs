//! Tunnel core command line
//!
//! The core takes one flag per profile field. Empty fields are omitted
//! rather than passed as empty strings, and the resolved endpoint is passed
//! verbatim, port included.

use std::fmt;
use std::path::{Path, PathBuf};

use ep_core::Profile;

use crate::error::SupervisorError;

const FLAG_SERVER: &str = "-f";
const FLAG_LISTEN: &str = "-l";
const FLAG_TOKEN: &str = "-token";
const FLAG_ROUTING: &str = "-routing";
const FLAG_ENDPOINT: &str = "-ip";

/// Recognised core options, one per flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreArgs {
    pub server: Option<String>,
    pub listen: Option<String>,
    pub token: Option<String>,
    pub routing: Option<String>,
    pub endpoint: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl CoreArgs {
    /// Options for `profile`, with an optional resolved endpoint
    pub fn from_profile(profile: &Profile, endpoint: Option<&str>) -> Self {
        Self {
            server: non_empty(&profile.remote_server),
            listen: non_empty(&profile.listen_address),
            token: non_empty(&profile.auth_token),
            routing: non_empty(profile.routing_mode.as_flag()),
            endpoint: endpoint.and_then(non_empty),
        }
    }

    fn pairs(&self) -> [(&'static str, Option<&String>); 5] {
        [
            (FLAG_SERVER, self.server.as_ref()),
            (FLAG_LISTEN, self.listen.as_ref()),
            (FLAG_TOKEN, self.token.as_ref()),
            (FLAG_ROUTING, self.routing.as_ref()),
            (FLAG_ENDPOINT, self.endpoint.as_ref()),
        ]
    }

    /// Render as `flag value` pairs in a fixed order
    pub fn to_args(&self) -> Vec<String> {
        self.pairs()
            .into_iter()
            .filter_map(|(flag, value)| value.map(|v| [flag.to_string(), v.clone()]))
            .flatten()
            .collect()
    }

    /// Parse arguments produced by [`CoreArgs::to_args`]
    pub fn parse<I, S>(args: I) -> Result<Self, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Self::default();
        let mut iter = args.into_iter();

        while let Some(flag) = iter.next() {
            let flag = flag.as_ref();
            let slot = match flag {
                FLAG_SERVER => &mut parsed.server,
                FLAG_LISTEN => &mut parsed.listen,
                FLAG_TOKEN => &mut parsed.token,
                FLAG_ROUTING => &mut parsed.routing,
                FLAG_ENDPOINT => &mut parsed.endpoint,
                other => return Err(SupervisorError::InvalidArgument(other.to_string())),
            };
            let value = iter
                .next()
                .ok_or_else(|| SupervisorError::InvalidArgument(format!("{} needs a value", flag)))?;
            *slot = Some(value.as_ref().to_string());
        }

        Ok(parsed)
    }
}

/// Program plus arguments, ready to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl AsRef<Path>, args: Vec<String>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args,
        }
    }

    /// Command line for the core at `program` with `core_args`
    pub fn for_core(program: impl AsRef<Path>, core_args: &CoreArgs) -> Self {
        Self::new(program, core_args.to_args())
    }

    /// The same command with the auth token value masked, for logging
    pub fn redacted(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("***".to_string());
            } else {
                parts.push(arg.clone());
            }
            mask_next = arg == FLAG_TOKEN;
        }
        parts.join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
