//! Command registry: a fixed-capacity table mapping an uppercase verb to
//! a handler and an optional pre-hook. The pre-hook runs before the
//! handler and clears stale per-session state (a pending REST offset, a
//! pending RNFR) so unrelated commands in between don't leave it lying
//! around; if the pre-hook fails the handler is skipped.

use std::future::Future;
use std::pin::Pin;

use crate::error::FtpResult;
use crate::session::Session;

/// Upper bound on registered commands, matching the table this mirrors.
pub const MAX_COMMANDS: usize = 64;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = FtpResult<()>> + Send + 'a>>;
pub type HandlerFn = for<'a> fn(&'a mut Session, Option<&'a str>) -> HandlerFuture<'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreHook {
    /// Zeros the restart offset. Run before RNTO.
    ClearRestart,
    /// Clears the RNFR pending state. Run before REST, STOR, RETR.
    ClearRename,
    /// Both of the above. The default for every other stateful command.
    ClearAll,
}

impl PreHook {
    fn run(self, session: &mut Session) {
        match self {
            PreHook::ClearRestart => session.restart_offset = 0,
            PreHook::ClearRename => session.rename_from = None,
            PreHook::ClearAll => {
                session.restart_offset = 0;
                session.rename_from = None;
            }
        }
    }
}

struct Entry {
    verb: &'static str,
    handler: HandlerFn,
    pre_hook: Option<PreHook>,
}

/// Fixed-capacity (by construction: entries are only ever pushed at
/// startup from a hardcoded list below) verb → handler table.
pub struct CommandRegistry {
    entries: Vec<Entry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry { entries: Vec::with_capacity(MAX_COMMANDS) }
    }

    fn register(&mut self, verb: &'static str, handler: HandlerFn, pre_hook: Option<PreHook>) {
        debug_assert!(self.entries.len() < MAX_COMMANDS, "command registry overflow");
        self.entries.push(Entry { verb, handler, pre_hook });
    }

    fn lookup(&self, verb: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.verb == verb)
    }

    /// Runs the pre-hook (if any) then the handler for `verb`. Returns
    /// `None` if the verb isn't registered, so the caller can reply 502.
    pub async fn dispatch(&self, session: &mut Session, verb: &str, arg: Option<&str>) -> Option<FtpResult<()>> {
        let entry = self.lookup(verb)?;
        if let Some(hook) = entry.pre_hook {
            hook.run(session);
        }
        Some((entry.handler)(session, arg).await)
    }

    pub fn is_registered(&self, verb: &str) -> bool {
        self.lookup(verb).is_some()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.install_defaults();
        registry
    }
}

macro_rules! h {
    ($f:path) => {
        |session, arg| Box::pin($f(session, arg))
    };
}

impl CommandRegistry {
    fn install_defaults(&mut self) {
        use crate::handlers as cmd;
        use PreHook::*;

        self.register("USER", h!(cmd::user), Some(ClearAll));
        self.register("PASS", h!(cmd::pass), Some(ClearAll));
        self.register("ACCT", h!(cmd::acct), Some(ClearAll));
        self.register("CWD", h!(cmd::cwd), Some(ClearAll));
        self.register("CDUP", h!(cmd::cdup), Some(ClearAll));
        self.register("SMNT", h!(cmd::smnt), Some(ClearAll));
        self.register("QUIT", h!(cmd::quit), Some(ClearAll));
        self.register("REIN", h!(cmd::rein), Some(ClearAll));
        self.register("PORT", h!(cmd::port), Some(ClearAll));
        self.register("PASV", h!(cmd::pasv), Some(ClearAll));
        self.register("TYPE", h!(cmd::type_), Some(ClearAll));
        self.register("MODE", h!(cmd::mode), Some(ClearAll));
        self.register("STRU", h!(cmd::stru), Some(ClearAll));
        self.register("ALLO", h!(cmd::allo), Some(ClearAll));
        self.register("REST", h!(cmd::rest), Some(ClearRename));
        self.register("STOR", h!(cmd::stor), Some(ClearRename));
        self.register("STOU", h!(cmd::stou), Some(ClearAll));
        self.register("RETR", h!(cmd::retr), Some(ClearRename));
        self.register("APPE", h!(cmd::appe), Some(ClearAll));
        self.register("LIST", h!(cmd::list), Some(ClearAll));
        self.register("NLST", h!(cmd::nlst), Some(ClearAll));
        self.register("RNFR", h!(cmd::rnfr), Some(ClearAll));
        self.register("RNTO", h!(cmd::rnto), Some(ClearRestart));
        self.register("DELE", h!(cmd::dele), Some(ClearAll));
        self.register("RMD", h!(cmd::rmd), Some(ClearAll));
        self.register("MKD", h!(cmd::mkd), Some(ClearAll));
        self.register("PWD", h!(cmd::pwd), Some(ClearAll));
        self.register("ABOR", h!(cmd::abor), None);
        self.register("SYST", h!(cmd::syst), Some(ClearAll));
        self.register("STAT", h!(cmd::stat), Some(ClearAll));
        self.register("HELP", h!(cmd::help), Some(ClearAll));
        self.register("SITE", h!(cmd::site), Some(ClearAll));
        self.register("NOOP", h!(cmd::noop), None);
        self.register("SIZE", h!(cmd::size), Some(ClearAll));
        self.register("MDTM", h!(cmd::mdtm), Some(ClearAll));
        self.register("FEAT", h!(cmd::feat), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_recognised_verb() {
        let registry = CommandRegistry::default();
        let verbs = [
            "USER", "PASS", "ACCT", "CWD", "CDUP", "SMNT", "QUIT", "REIN", "PORT", "PASV", "TYPE",
            "MODE", "STRU", "ALLO", "REST", "STOR", "STOU", "RETR", "APPE", "LIST", "NLST", "RNFR",
            "RNTO", "DELE", "RMD", "MKD", "PWD", "ABOR", "SYST", "STAT", "HELP", "SITE", "NOOP",
            "SIZE", "MDTM", "FEAT",
        ];
        for v in verbs {
            assert!(registry.is_registered(v), "missing handler for {v}");
        }
        assert!(!registry.is_registered("BOGUS"));
    }

    #[test]
    fn registry_stays_within_capacity() {
        let registry = CommandRegistry::default();
        assert!(registry.entries.len() <= MAX_COMMANDS);
    }
}
