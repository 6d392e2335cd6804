use crate::error::CommandError;

pub const HELP: &str = "\
Type a request to start a task. Commands:
  /cancel                       cancel the running task
  /providers                    list providers and their status
  /catalog                      list installable provider templates
  /install <template>           install a template for the workspace
  /add <name> <command> [args]  add a provider definition
  /update <id> <command> [args] change a provider's command line
  /connect <id>                 connect a provider
  /disconnect <id>              disconnect a provider
  /remove <id>                  remove a provider
  /quit                         exit";

/// One line of host input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Submit(String),
    Cancel,
    Providers,
    Catalog,
    Install(String),
    Add {
        name: String,
        command: String,
        args: Vec<String>,
    },
    Update {
        id: String,
        command: String,
        args: Vec<String>,
    },
    Connect(String),
    Disconnect(String),
    Remove(String),
    Help,
    Quit,
    Empty,
}

pub fn parse_line(line: &str) -> Result<HostCommand, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(HostCommand::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(HostCommand::Submit(line.to_string()));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let command = match name {
        "cancel" => HostCommand::Cancel,
        "providers" => HostCommand::Providers,
        "catalog" => HostCommand::Catalog,
        "help" => HostCommand::Help,
        "quit" | "exit" => HostCommand::Quit,
        "install" => HostCommand::Install(required(words.next(), "install", "<template>")?),
        "connect" => HostCommand::Connect(required(words.next(), "connect", "<id>")?),
        "disconnect" => HostCommand::Disconnect(required(words.next(), "disconnect", "<id>")?),
        "remove" => HostCommand::Remove(required(words.next(), "remove", "<id>")?),
        "add" => {
            const USAGE: &str = "<name> <command> [args]";
            let name = required(words.next(), "add", USAGE)?;
            let command = required(words.next(), "add", USAGE)?;
            HostCommand::Add {
                name,
                command,
                args: words.map(str::to_string).collect(),
            }
        }
        "update" => {
            const USAGE: &str = "<id> <command> [args]";
            let id = required(words.next(), "update", USAGE)?;
            let command = required(words.next(), "update", USAGE)?;
            HostCommand::Update {
                id,
                command,
                args: words.map(str::to_string).collect(),
            }
        }
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}

/// Whether a permission prompt answer grants the request.
pub fn is_approval(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn required(
    word: Option<&str>,
    command: &'static str,
    usage: &'static str,
) -> Result<String, CommandError> {
    word.map(str::to_string)
        .ok_or(CommandError::MissingArgument { command, usage })
}
