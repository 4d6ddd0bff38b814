//! nsres REPL: poke at a namespace runtime interactively.
//!
//! One [`Runtime`] and one [`CallStack`] live for the whole session. Input
//! is split on whitespace:
//!
//! - `namespace ...` runs the namespace command ensemble
//! - `proc NAME`, `command NAME`, `hidden NAME` define entities
//! - `alias NAME TARGET` defines an alias by hand
//! - `resolve var|global|cmd NAME` shows where a name ends up
//! - `call NAME` and `block NAME` push frames, `leave` pops one
//! - Meta-commands: `/help`, `/tree`, `/entities`, `/frames`, `/quit`

use anyhow::{Context, Result};
use directories::BaseDirs;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;

use nsres_kernel::commands::namespace;
use nsres_kernel::name;
use nsres_kernel::{CallFrame, CallStack, CommandLookup, Entity, Runtime, RuntimeConfig};

/// REPL state.
pub struct Repl {
    runtime: Runtime,
    stack: CallStack,
    quit: bool,
}

impl Repl {
    /// A REPL over a default runtime.
    pub fn new() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        let runtime = Runtime::new(config);
        let stack = runtime.new_stack().context("Failed to create call stack")?;
        Ok(Self {
            runtime,
            stack,
            quit: false,
        })
    }

    /// Has `/quit` been seen?
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Qualified name of the namespace the stack is evaluating in.
    pub fn current_namespace(&mut self) -> Result<String> {
        let current = self.runtime.current_namespace(&mut self.stack)?;
        Ok(self.runtime.qualified_name(current)?)
    }

    /// Process a single line of input.
    pub fn process_line(&mut self, line: &str) -> Result<Option<String>> {
        let trimmed = line.trim();

        if trimmed.starts_with('/') {
            return self.handle_meta_command(trimmed);
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        tracing::debug!(line = %trimmed, "repl input");
        let words: Vec<&str> = trimmed.split_whitespace().collect();
        let output = match words.as_slice() {
            ["namespace", args @ ..] => namespace(&self.runtime, &mut self.stack, args)?,
            ["proc", name] => self.define(name, Entity::procedure())?,
            ["command", name] => self.define(name, Entity::command())?,
            ["hidden", name] => self.define(name, Entity::command().hidden())?,
            ["alias", name, target] => {
                let target = self.runtime.normalize_name(&mut self.stack, target)?;
                self.define(name, Entity::alias(target))?
            }
            ["undefine", name] => {
                let absolute = self.runtime.normalize_name(&mut self.stack, name)?;
                self.runtime.undefine(&absolute)?;
                String::new()
            }
            ["resolve", "var", name] => {
                let target = self.runtime.resolve_variable(&mut self.stack, name, false)?;
                format!("{} {}", target.scope, target.name)
            }
            ["resolve", "global", name] => {
                let target = self.runtime.resolve_variable(&mut self.stack, name, true)?;
                format!("{} {}", target.scope, target.name)
            }
            ["resolve", "cmd", name] => {
                self.runtime
                    .resolve_command(&mut self.stack, name, CommandLookup::default())?
            }
            ["call", name] => {
                self.stack.push(CallFrame::procedure(*name));
                String::new()
            }
            ["block", name] => {
                self.stack.push(CallFrame::block(*name));
                String::new()
            }
            ["leave"] => match self.stack.pop() {
                Some(frame) => format!("left {}", frame.name()),
                None => anyhow::bail!("already at the global frame"),
            },
            ["reset"] => {
                self.runtime.reset(&mut self.stack, false)?;
                String::new()
            }
            ["reset", "-keep"] => {
                self.runtime.reset(&mut self.stack, true)?;
                String::new()
            }
            [other, ..] => anyhow::bail!("unknown command: {other}"),
            [] => String::new(),
        };

        Ok((!output.is_empty()).then_some(output))
    }

    fn define(&mut self, name: &str, entity: Entity) -> Result<String> {
        Ok(self.runtime.define(&mut self.stack, name, entity)?)
    }

    /// Handle a meta-command (starts with /).
    fn handle_meta_command(&mut self, cmd: &str) -> Result<Option<String>> {
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().copied().unwrap_or("");

        match command {
            "/quit" | "/q" | "/exit" => {
                self.quit = true;
                Ok(None)
            }
            "/help" | "/h" | "/?" => Ok(Some(HELP_TEXT.to_string())),
            "/tree" => self.render_tree().map(Some),
            "/entities" => {
                let names = self.runtime.entity_names()?;
                if names.is_empty() {
                    return Ok(Some("(no entities)".to_string()));
                }
                let mut output = String::new();
                for entity_name in names {
                    let line = match self.runtime.entity(&entity_name)? {
                        Some(entity) => match entity.alias_target() {
                            Some(target) => format!("  {entity_name} -> {target}"),
                            None if entity.hidden => format!("  {entity_name} (hidden)"),
                            None => format!("  {entity_name}"),
                        },
                        None => continue,
                    };
                    output.push_str(&line);
                    output.push('\n');
                }
                Ok(Some(output.trim_end().to_string()))
            }
            "/frames" => {
                let mut output = String::new();
                for (depth, frame) in self.stack.iter_nearest().enumerate() {
                    let binding = match frame.binding() {
                        Some(id) => self
                            .runtime
                            .qualified_name(id)
                            .unwrap_or_else(|_| "<disposed>".to_string()),
                        None => "-".to_string(),
                    };
                    output.push_str(&format!("  #{depth} {} [{binding}]\n", frame.name()));
                }
                Ok(Some(output.trim_end().to_string()))
            }
            _ => Ok(Some(format!(
                "Unknown command: {command}\nType /help for available commands."
            ))),
        }
    }

    fn render_tree(&mut self) -> Result<String> {
        let global = self.runtime.global_namespace()?;
        let mut names = self.runtime.descendants(global, None, false)?;
        names.sort();

        let mut output = String::from(name::GLOBAL_NAME);
        for qualified in names {
            let depth = name::count_qualifiers(name::trim_leading(&qualified).0) + 1;
            output.push('\n');
            output.push_str(&"  ".repeat(depth));
            output.push_str(name::tail_only(&qualified));
        }
        Ok(output)
    }
}

const HELP_TEXT: &str = r#"nsres REPL

Commands:
  /help, /h, /?     Show this help
  /quit, /q, /exit  Exit the REPL
  /tree             Show the namespace tree
  /entities         Show defined commands
  /frames           Show the call stack, nearest first

Input:
  namespace SUB ...          children current delete descendants enable eval
                             exists export forget import mappings origin
                             parent qualifiers tail which
  proc NAME                  Define a procedure
  command NAME               Define a command
  hidden NAME                Define a hidden command
  alias NAME TARGET          Define an alias
  undefine NAME              Remove a command
  resolve var|global NAME    Where a variable lives
  resolve cmd NAME           Which command a name reaches
  call NAME / block NAME     Push a procedure or block frame
  leave                      Pop the nearest frame
  reset ?-keep?              Start over, optionally keeping globals

Examples:
  namespace eval ::lib
  proc helper
  namespace export helper
  leave
  namespace eval ::app
  namespace import ::lib::*
  namespace origin helper
"#;

/// Where the line editor keeps its history.
fn history_path() -> Option<std::path::PathBuf> {
    BaseDirs::new().map(|dirs| dirs.data_dir().join("nsres").join("history.txt"))
}

/// Run the REPL.
pub fn run() -> Result<()> {
    println!("nsres v{}", env!("CARGO_PKG_VERSION"));
    println!("Type /help for commands, /quit to exit.\n");

    let mut rl: Editor<(), DefaultHistory> = Editor::new().context("Failed to create editor")?;

    let history_path = history_path();
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    let mut repl = Repl::new()?;

    while !repl.should_quit() {
        let prompt = format!("{}> ", repl.current_namespace()?);

        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                match repl.process_line(&line) {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }

    Ok(())
}
