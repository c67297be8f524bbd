use super::value::Target;
use crate::ConfigError;
use clap::{Arg, ArgAction, Command};
use core::time::Duration;
use std::collections::HashMap;

/// Returns the flag form of a declaration: lowercased parts joined by `.`.
pub fn flag_name(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.to_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

/// Returns the environment form of a declaration: the app name followed by
/// the parts, uppercased and joined by `_`.
pub fn env_name(appname: &str, parts: &[&str]) -> String {
    core::iter::once(appname)
        .chain(parts.iter().copied())
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join("_")
}

struct Declaration<'a> {
    flag: String,
    env: String,
    usage: String,
    default: String,
    target: Target<'a>,
}

impl Declaration<'_> {
    fn listing(&self) -> String {
        format!(
            "-{}={} ({}) a {}, {}",
            self.flag,
            self.default,
            self.env,
            self.target.type_name(),
            self.usage
        )
    }
}

/// A set of typed options resolved from command-line flags first and
/// environment variables second.
///
/// Each declaration borrows the variable it fills. The value the variable
/// holds at declaration time is the default. Parsing consumes the set, which
/// releases the borrows.
pub struct FlagSet<'a> {
    appname: String,
    about: String,
    decls: Vec<Declaration<'a>>,
    duplicate: Option<String>,
}

impl<'a> FlagSet<'a> {
    pub fn new(appname: impl Into<String>) -> Self {
        Self {
            appname: appname.into(),
            about: String::new(),
            decls: Vec::new(),
            duplicate: None,
        }
    }

    /// One-line description printed after the app name in the usage listing.
    pub fn about(&mut self, about: impl Into<String>) -> &mut Self {
        self.about = about.into();
        self
    }

    pub fn appname(&self) -> &str {
        &self.appname
    }

    pub fn string(&mut self, v: &'a mut String, usage: &str, parts: &[&str]) {
        self.declare(Target::Str(v), usage, parts);
    }

    pub fn int(&mut self, v: &'a mut i64, usage: &str, parts: &[&str]) {
        self.declare(Target::Int(v), usage, parts);
    }

    pub fn float(&mut self, v: &'a mut f64, usage: &str, parts: &[&str]) {
        self.declare(Target::Float(v), usage, parts);
    }

    pub fn bool(&mut self, v: &'a mut bool, usage: &str, parts: &[&str]) {
        self.declare(Target::Bool(v), usage, parts);
    }

    pub fn duration(&mut self, v: &'a mut Duration, usage: &str, parts: &[&str]) {
        self.declare(Target::Duration(v), usage, parts);
    }

    fn declare(&mut self, target: Target<'a>, usage: &str, parts: &[&str]) {
        let flag = flag_name(parts);
        if self.decls.iter().any(|d| d.flag == flag) {
            self.duplicate.get_or_insert(flag);
            return;
        }
        self.decls.push(Declaration {
            env: env_name(&self.appname, parts),
            default: target.render(),
            usage: usage.to_owned(),
            flag,
            target,
        });
    }

    /// Generated listing: a header line, then one sorted line per option.
    pub fn usage(&self) -> String {
        let mut lines: Vec<String> = self.decls.iter().map(Declaration::listing).collect();
        lines.sort();
        format!("{}: {}\n{}", self.appname, self.about, lines.join("\n"))
    }

    /// Resolves every declaration from the process arguments and environment.
    pub fn parse(self) -> Result<(), ConfigError> {
        let args: Vec<String> = std::env::args_os()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let environ: Vec<(String, String)> = std::env::vars_os()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            })
            .collect();
        self.parse_from(args, environ)
    }

    /// Resolves every declaration from `args` (program name first, as in
    /// [`std::env::args`]) and `environ`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::HelpRequested`] if the only argument is `-h` or
    ///   `-help`.
    /// - [`ConfigError::DuplicateFlag`] if a flag name was declared twice.
    /// - [`ConfigError::BadUsage`] for unknown flags, stray arguments, or
    ///   values that do not parse as the declared type.
    pub fn parse_from<I, A, E, K, V>(mut self, args: I, environ: E) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(flag) = self.duplicate.take() {
            return Err(ConfigError::DuplicateFlag { flag });
        }

        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if let [_, only] = args.as_slice() {
            let arg = only.trim_start_matches('-');
            if only.starts_with('-') && (arg == "h" || arg == "help") {
                return Err(ConfigError::HelpRequested {
                    usage: self.usage(),
                });
            }
        }

        let environ: HashMap<String, String> = environ
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        match self.resolve(args, &environ) {
            Ok(()) => Ok(()),
            Err(reason) => Err(ConfigError::BadUsage {
                usage: self.usage(),
                appname: self.appname,
                reason,
            }),
        }
    }

    fn resolve(&mut self, args: Vec<String>, environ: &HashMap<String, String>) -> Result<(), String> {
        let args = self.normalize(args);
        let matches = self
            .command()
            .try_get_matches_from(args)
            .map_err(|e| clap_reason(&e))?;

        for decl in &mut self.decls {
            let from_flag = matches
                .try_get_one::<String>(&decl.flag)
                .map_err(|e| e.to_string())?;

            if let Some(raw) = from_flag {
                decl.target
                    .assign(raw)
                    .map_err(|e| format!("invalid value {raw:?} for flag -{}: {e}", decl.flag))?;
            } else if let Some(raw) = environ.get(&decl.env) {
                decl.target
                    .assign(raw)
                    .map_err(|e| format!("invalid value {raw:?} for {}: {e}", decl.env))?;
            }
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.appname.clone())
            .disable_help_flag(true)
            .disable_version_flag(true)
            .args_override_self(true);

        for decl in &self.decls {
            let arg = Arg::new(decl.flag.clone())
                .long(decl.flag.clone())
                .help(decl.usage.clone())
                .value_name(decl.target.type_name())
                .action(ArgAction::Set);
            let arg = if decl.target.is_bool() {
                arg.num_args(0..=1)
                    .require_equals(true)
                    .default_missing_value("true")
            } else {
                arg.num_args(1).allow_hyphen_values(true)
            };
            cmd = cmd.arg(arg);
        }
        cmd
    }

    /// Rewrites single-dash long flags (`-listen.addr=x`) to the double-dash
    /// form clap expects, leaving everything after `--` alone.
    fn normalize(&self, args: Vec<String>) -> Vec<String> {
        let mut terminated = false;
        args.into_iter()
            .enumerate()
            .map(|(i, arg)| {
                if i == 0 || terminated {
                    return arg;
                }
                if arg == "--" {
                    terminated = true;
                    return arg;
                }
                match arg.strip_prefix('-') {
                    Some(rest) if !rest.starts_with('-') => {
                        let name = rest.split('=').next().unwrap_or(rest);
                        if self.decls.iter().any(|d| d.flag == name) {
                            format!("-{arg}")
                        } else {
                            arg
                        }
                    }
                    _ => arg,
                }
            })
            .collect()
    }
}

/// First line of a clap error, without the `error: ` prefix.
fn clap_reason(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.trim_start_matches("error: ").to_owned()
}
