pub mod help;
pub mod request;
pub mod start;
pub mod stats;
pub mod upload;
pub mod vote;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Stats,
    Request(String),
}

/// Parses `/name[@bot] args`. Commands addressed to another bot, and unknown
/// commands, yield `None`.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (head, argument) = match rest.split_once(char::is_whitespace) {
        Some((head, argument)) => (head, argument.trim()),
        None => (rest, ""),
    };
    let name = match head.split_once('@') {
        Some((name, target)) => {
            let ours = bot_username.map_or(false, |ours| ours.eq_ignore_ascii_case(target));
            if !ours {
                return None;
            }
            name
        }
        None => head,
    };

    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "help" => Some(Command::Help),
        "stats" => Some(Command::Stats),
        "request" => Some(Command::Request(argument.to_string())),
        _ => None,
    }
}
