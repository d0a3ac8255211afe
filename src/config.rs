/// browser string sent upstream, most cdns refuse anything that looks like a bot
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum RelayEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
#[command(name = "hls-relay", version, about = "CORS relay for HLS playlists and segments")]
pub struct AppConfig {
    // production or development, changes where logs go
    #[clap(long, env, value_enum, default_value = "development")]
    pub relay_env: RelayEnv,

    // interface to bind, keep it on loopback unless something sits in front of it
    #[clap(long, env, default_value = "127.0.0.1")]
    pub bind_address: String,

    // port that the relay will bind to
    #[clap(long, env, default_value = "3001")]
    pub port: u16,

    // this should be either * for allowing everything, or a comma seperated list of origins like
    // https://example.com,https://something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // what rewritten playlist lines point at. a bare path keeps them relative to whatever host
    // served the playlist, set a full url if the relay is mounted somewhere else
    #[clap(long, env, default_value = "/proxy")]
    pub relay_prefix: String,

    // playlists get buffered whole before rewriting, anything bigger than this is refused
    #[clap(long, env, default_value = "8388608")]
    pub max_playlist_bytes: usize,

    // no timeout unless this is set
    #[clap(long, env)]
    pub upstream_timeout_secs: Option<u64>,

    #[clap(long, env, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    // only used in production, dev logs to stdout
    #[clap(long, env, default_value = "logs")]
    pub log_dir: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            relay_env: RelayEnv::Development,
            bind_address: "127.0.0.1".to_string(),
            port: 3001,
            cors_origin: "*".to_string(),
            relay_prefix: "/proxy".to_string(),
            max_playlist_bytes: 8 * 1024 * 1024,
            upstream_timeout_secs: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_dir: "logs".to_string(),
            sentry_dsn: None,
        }
    }
}
