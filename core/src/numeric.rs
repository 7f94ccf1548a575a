//! Numeric replies the gateway sends

/// Reply codes used by the informational handlers and the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NumericReply {
    RplStatsLinkInfo = 211,
    RplEndOfStats = 219,
    RplStatsUptime = 242,
    RplAdminMe = 256,
    RplAdminLoc1 = 257,
    RplAdminLoc2 = 258,
    RplAdminEmail = 259,
    RplAway = 301,
    RplWhoisUser = 311,
    RplWhoisServer = 312,
    RplWhoisIdle = 317,
    RplEndOfWhois = 318,
    RplWhoisChannels = 319,
    RplVersion = 351,
    RplInfo = 371,
    RplMotd = 372,
    RplEndOfInfo = 374,
    RplMotdStart = 375,
    RplEndOfMotd = 376,
    RplTime = 391,
    ErrNoSuchNick = 401,
    ErrNoSuchChannel = 403,
    ErrNoMotd = 422,
    ErrNotOnChannel = 442,
}

impl NumericReply {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// `:server NNN target rest`, with `rest` already formatted
    pub fn line(self, server: &str, target: &str, rest: &str) -> String {
        format!(":{} {:03} {} {}", server, self.code(), target, rest)
    }
}
