//! Applying gate commands to the registry
//!
//! | action      | rate        | active | backtrace | stored rate |
//! |-------------|-------------|--------|-----------|-------------|
//! | `start`     | none        | on     | on        | unchanged   |
//! | `start`     | `0`         | on     | off       | unchanged   |
//! | `start`     | `n > 0`     | on     | on        | `n`         |
//! | `stop`      | any         | off    | off       | unchanged   |
//! | `configure` | `n > 0`     | -      | on        | `n`         |
//! | `configure` | `0`         | -      | off       | unchanged   |
//! | `configure` | none        | -      | -         | unchanged   |
//!
//! A negative rate or an unknown category changes nothing. The
//! `monitorStackTrace` alias drives the backtrace flag of `monitorEvents`
//! and leaves its `active` flag alone.

use perfagent_common::{Action, Command, GateRegistry, GateTarget};

use crate::domain::DispatchError;

/// Apply a `start`/`stop`/`configure` command
///
/// # Errors
/// Returns the reason the command had no effect.
pub fn apply(gates: &GateRegistry, command: &Command) -> Result<(), DispatchError> {
    let target = gates
        .resolve(&command.category)
        .ok_or_else(|| DispatchError::UnknownCategory(command.category.clone()))?;

    if let Some(rate) = command.rate.filter(|rate| *rate < 0) {
        return Err(DispatchError::NegativeRate { category: command.category.clone(), rate });
    }

    let (gate, toggles_delivery) = match target {
        GateTarget::Gate(gate) => (gate, true),
        GateTarget::BacktraceOnly(gate) => (gate, false),
    };

    match command.action {
        Action::Start => {
            match command.rate {
                Some(rate) => gate.configure(rate),
                None => gate.set_backtrace(true),
            }
            if toggles_delivery {
                gate.set_active(true);
            }
        }
        Action::Stop => {
            if toggles_delivery {
                gate.set_active(false);
            }
            gate.set_backtrace(false);
        }
        Action::Configure => {
            let rate =
                command.rate.ok_or_else(|| DispatchError::MissingRate(command.category.clone()))?;
            gate.configure(rate);
        }
        Action::ServerStart { .. } | Action::ServerStop => {
            return Err(DispatchError::UnknownCategory(command.category.clone()));
        }
    }
    Ok(())
}
