use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(
    name = "spinup",
    version,
    about = "Spin up clusters of libvirt machines from the command line",
    after_help = "VERBS:\n  create [descriptor [-- descriptor ...]]  (default)\n  ssh [name]\n  destroy\n  shutdown [name]\n  start [name]\n  status [name]\n\nDESCRIPTOR TOKENS:\n  <n>[K|M|G|T]  memory\n  <n>cpus       processor count\n  <variant>     ubuntu, debian, fedora, centos, coreos\n  :<name>       machine name"
)]
pub struct Cli {
    #[arg(long = "log", default_value = "info")]
    pub log: String,

    #[arg(long = "config")]
    pub config_path: Option<PathBuf>,

    /// Verb followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Ssh,
    Destroy,
    Shutdown,
    Start,
    Status,
}

const VERBS: &[(&str, Verb)] = &[
    ("create", Verb::Create),
    ("ssh", Verb::Ssh),
    ("destroy", Verb::Destroy),
    ("shutdown", Verb::Shutdown),
    ("start", Verb::Start),
    ("status", Verb::Status),
];

#[derive(Error, Debug)]
#[error("unknown verb: {0}")]
pub struct UnknownVerb(String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VERBS
            .iter()
            .find(|(keyword, _)| *keyword == s)
            .map(|(_, verb)| *verb)
            .ok_or_else(|| UnknownVerb(s.to_owned()))
    }
}

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("{verb} takes at most one machine name, got: {}", args.join(" "))]
    TooManyNames { verb: &'static str, args: Vec<String> },

    #[error("{verb} takes no arguments, got: {}", args.join(" "))]
    UnexpectedArgs { verb: &'static str, args: Vec<String> },
}

impl Verb {
    pub fn keyword(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Ssh => "ssh",
            Verb::Destroy => "destroy",
            Verb::Shutdown => "shutdown",
            Verb::Start => "start",
            Verb::Status => "status",
        }
    }

    /// Split raw arguments into a verb and what follows it.
    ///
    /// Anything that is not a verb starts a `create` descriptor.
    pub fn split(args: &[String]) -> (Verb, &[String]) {
        match args.split_first() {
            Some((first, rest)) => match first.parse() {
                Ok(verb) => (verb, rest),
                Err(_) => (Verb::Create, args),
            },
            None => (Verb::Create, args),
        }
    }

    pub fn optional_name<'a>(&self, args: &'a [String]) -> Result<Option<&'a str>, UsageError> {
        match args {
            [] => Ok(None),
            [name] => Ok(Some(name.as_str())),
            _ => Err(UsageError::TooManyNames {
                verb: self.keyword(),
                args: args.to_vec(),
            }),
        }
    }

    pub fn no_args(&self, args: &[String]) -> Result<(), UsageError> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(UsageError::UnexpectedArgs {
                verb: self.keyword(),
                args: args.to_vec(),
            })
        }
    }
}
