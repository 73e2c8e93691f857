//! Grammar for the administrative `command` operations

/// The word that introduces every administrative operation
pub const PLUGIN_NAME: &str = "command";

const USAGE: &str = "command add <name> <code> | command del <name> | command list | command \
                     show <name>";
const USAGE_ADD: &str = "command add <name> <code>";
const USAGE_DEL: &str = "command del <name>";
const USAGE_LIST: &str = "command list";
const USAGE_SHOW: &str = "command show <name>";

/// A permission an operation may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Create, overwrite and delete commands
    CommandEdit,
}

impl Capability {
    /// The name this capability is configured by
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CommandEdit => "commandedit",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// A parsed administrative operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// `command add <name> <code...>`
    Add {
        /// Name to store the snippet under
        name: String,
        /// Snippet source, with tokens rejoined by single spaces
        code: String,
    },
    /// `command del <name>`
    Del {
        /// Name of the command to delete
        name: String,
    },
    /// `command list`
    List,
    /// `command show <name>`
    Show {
        /// Name of the command to show
        name: String,
    },
    /// `help command [topic]`
    Help {
        /// Help topic, if one was given
        topic: Option<String>,
    },
}

impl AdminCommand {
    /// The capability the sender must hold to run this operation
    #[must_use]
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Self::Add { .. } | Self::Del { .. } => Some(Capability::CommandEdit),
            Self::List | Self::Show { .. } | Self::Help { .. } => None,
        }
    }
}

/// A message that names the plugin but doesn't fit any operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Usage: {0}")]
pub struct ParseError(pub &'static str);

/// Parse the body of an addressed message
///
/// Returns `None` if the message isn't an administrative operation at all.
#[must_use]
pub fn parse(body: &str) -> Option<Result<AdminCommand, ParseError>> {
    let mut toks = body.split_whitespace();

    match toks.next()? {
        PLUGIN_NAME => Some(parse_op(toks)),
        "help" if toks.next() == Some(PLUGIN_NAME) => Some(Ok(AdminCommand::Help {
            topic: toks.next().map(ToOwned::to_owned),
        })),
        _ => None,
    }
}

fn parse_op<'a>(mut toks: impl Iterator<Item = &'a str>) -> Result<AdminCommand, ParseError> {
    let op = toks.next().ok_or(ParseError(USAGE))?;

    let cmd = match op {
        "add" => {
            let name = toks.next().ok_or(ParseError(USAGE_ADD))?;
            let code = toks.collect::<Vec<_>>().join(" ");

            if code.is_empty() {
                return Err(ParseError(USAGE_ADD));
            }

            return Ok(AdminCommand::Add {
                name: name.to_owned(),
                code,
            });
        },
        "del" => AdminCommand::Del {
            name: toks.next().ok_or(ParseError(USAGE_DEL))?.to_owned(),
        },
        "list" => AdminCommand::List,
        "show" => AdminCommand::Show {
            name: toks.next().ok_or(ParseError(USAGE_SHOW))?.to_owned(),
        },
        _ => return Err(ParseError(USAGE)),
    };

    if toks.next().is_some() {
        return Err(ParseError(match cmd {
            AdminCommand::Del { .. } => USAGE_DEL,
            AdminCommand::List => USAGE_LIST,
            _ => USAGE_SHOW,
        }));
    }

    Ok(cmd)
}
