//! Operator Control Surface
//!
//! Line-oriented commands mapping 1:1 onto the session manager's role
//! transitions, plus a read-only status readout. Failures surface as
//! messages, never as crashes; the binary's command loop does the
//! dispatching.

use crate::network::session::{Role, SessionManager};

/// A parsed operator command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanelCommand {
    /// Start as host.
    StartHost,
    /// Start as client.
    StartClient,
    /// Start as dedicated server.
    StartServer,
    /// Shut the session down.
    Shutdown,
    /// Print the status readout.
    Status,
    /// Run the scripted offline demo.
    Demo,
    /// Exit the process.
    Quit,
}

impl PanelCommand {
    /// Parse one input line. Case-insensitive; `None` for anything
    /// unrecognized.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "host" | "start-host" => Some(Self::StartHost),
            "client" | "start-client" => Some(Self::StartClient),
            "server" | "start-server" => Some(Self::StartServer),
            "shutdown" | "stop" => Some(Self::Shutdown),
            "status" => Some(Self::Status),
            "demo" => Some(Self::Demo),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }

    /// One-line usage summary.
    pub fn help() -> &'static str {
        "Commands: host | client | server | shutdown | status | demo | quit"
    }
}

/// Render the status readout: current role, the local participant id when
/// there is one, and the roster size.
pub fn status_line(session: &SessionManager) -> String {
    if !session.is_listening() {
        return "Role: Stopped".to_string();
    }

    let mut line = format!("Role: {}", session.role());
    if let Some(local) = session.local_participant() {
        line.push_str(&format!(" | ClientId: {local}"));
    }
    if session.role() != Role::Client {
        line.push_str(&format!(" | Participants: {}", session.participant_count()));
    }
    line
}
