//! Command dispatch table
//!
//! Maps a command token to the handler that processes it. The table is built
//! once and checked against [`SUPPORTED_COMMANDS`] when the gateway starts.

use rustc_hash::FxHashMap;

use crate::directory::{LinkId, UserId};
use crate::gateway::Gateway;
use crate::message::Message;
use crate::{handlers, identity, info, modes, Error, Result};

/// One received message with the link it arrived on
#[derive(Debug, Clone)]
pub struct Request {
    pub link: LinkId,
    pub message: Message,
    /// The source resolved to a known user, if it is one
    pub user: Option<UserId>,
}

impl Request {
    pub fn source(&self) -> &str {
        self.message.source()
    }

    pub fn param(&self, index: usize) -> &str {
        self.message.param(index)
    }

    pub fn param_count(&self) -> usize {
        self.message.params.len()
    }
}

pub type Handler = fn(&mut Gateway, &Request) -> Result<()>;

/// What to do with a command
#[derive(Clone, Copy)]
pub enum Route {
    Handle(Handler),
    /// Known and deliberately not acted on
    Ignore,
    /// The peer is closing the link
    Disconnect,
}

/// Every command the gateway recognises
pub const SUPPORTED_COMMANDS: &[&str] = &[
    "PRIVMSG", "QUIT", "MODE", "AWAY", "NICK", "WHOIS", "001", "JOIN", "PART", "KICK", "TOPIC",
    "332", "333", "VERSION", "INFO", "ADMIN", "MOTD", "TIME", "STATS", "SERVER", "SJOIN", "353",
    "311", "319", "301", "432", "KILL", "PING", "ERROR", "SQUIT",
    // informational traffic that needs no action
    "NOTICE", "GNOTICE", "PASS", "SVINFO", "CAPAB", "002", "003", "004", "005", "221", "251",
    "252", "253", "254", "255", "265", "266", "312", "317", "318", "366", "372", "375", "376",
    "401", "442",
];

const IGNORED: &[&str] = &[
    "NOTICE", "GNOTICE", "PASS", "SVINFO", "CAPAB", "002", "003", "004", "005", "221", "251",
    "252", "253", "254", "255", "265", "266", "312", "317", "318", "333", "366", "372", "375",
    "376", "401", "442",
];

pub struct Dispatcher {
    routes: FxHashMap<&'static str, Route>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut routes: FxHashMap<&'static str, Route> = FxHashMap::default();

        // users
        routes.insert("PRIVMSG", Route::Handle(handlers::handle_privmsg));
        routes.insert("QUIT", Route::Handle(handlers::handle_quit));
        routes.insert("MODE", Route::Handle(modes::handle_mode));
        routes.insert("AWAY", Route::Handle(identity::handle_away));
        routes.insert("NICK", Route::Handle(identity::handle_nick));
        routes.insert("WHOIS", Route::Handle(info::handle_whois));
        routes.insert("001", Route::Handle(handlers::handle_welcome));
        routes.insert("KILL", Route::Handle(handlers::handle_kill));
        routes.insert("PING", Route::Handle(handlers::handle_ping));

        // channels
        routes.insert("JOIN", Route::Handle(handlers::handle_join));
        routes.insert("PART", Route::Handle(handlers::handle_part));
        routes.insert("KICK", Route::Handle(handlers::handle_kick));
        routes.insert("TOPIC", Route::Handle(handlers::handle_topic));
        routes.insert("332", Route::Handle(handlers::handle_topic_reply));

        // server queries
        routes.insert("VERSION", Route::Handle(info::handle_version));
        routes.insert("INFO", Route::Handle(info::handle_info));
        routes.insert("ADMIN", Route::Handle(info::handle_admin));
        routes.insert("MOTD", Route::Handle(info::handle_motd));
        routes.insert("TIME", Route::Handle(info::handle_time));
        routes.insert("STATS", Route::Handle(info::handle_stats));

        // server to server
        routes.insert("SERVER", Route::Handle(handlers::handle_server));
        routes.insert("SJOIN", Route::Handle(handlers::handle_sjoin));

        // directory lookups
        routes.insert("353", Route::Handle(handlers::handle_names_reply));
        routes.insert("311", Route::Handle(identity::handle_whois_user));
        routes.insert("319", Route::Handle(identity::handle_whois_channels));
        routes.insert("301", Route::Handle(identity::handle_whois_away));
        routes.insert("432", Route::Handle(identity::handle_bad_nick));

        routes.insert("ERROR", Route::Disconnect);
        routes.insert("SQUIT", Route::Disconnect);

        for command in IGNORED {
            routes.insert(*command, Route::Ignore);
        }

        Self { routes }
    }

    /// Route for `command`, matched case-insensitively
    pub fn route(&self, command: &str) -> Option<Route> {
        self.routes.get(command.to_ascii_uppercase().as_str()).copied()
    }

    /// Every supported command has a route and every route is supported
    pub fn verify(&self) -> Result<()> {
        if let Some(missing) = SUPPORTED_COMMANDS.iter().find(|c| !self.routes.contains_key(*c)) {
            return Err(Error::Generic(format!("No handler for command {}", missing)));
        }
        if let Some(extra) = self.routes.keys().find(|c| !SUPPORTED_COMMANDS.contains(*c)) {
            return Err(Error::Generic(format!("Command {} is routed but not supported", extra)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_complete() {
        Dispatcher::new().verify().unwrap();
    }

    #[test]
    fn test_route_case_insensitive() {
        let dispatcher = Dispatcher::new();
        assert!(matches!(dispatcher.route("privmsg"), Some(Route::Handle(_))));
        assert!(matches!(dispatcher.route("Error"), Some(Route::Disconnect)));
        assert!(matches!(dispatcher.route("366"), Some(Route::Ignore)));
        assert!(dispatcher.route("WALLOPS").is_none());
    }
}
