//! Player-side half of the relay contract.
//!
//! A player starts on the upstream url directly. If that dies with a network-class failure and
//! the relay answered its probe, the player offers a manual switch to the relay. Nothing here
//! switches on its own: [`PlaybackSource::toggle`] is the only way the transport changes, and it
//! hands back a fresh source so playback restarts from the top of the stream.

use tracing::debug;

use crate::server::utils::playlist_utils::relay_reference;

/// url the player sends to check the relay is up. it isn't a real url so the relay answers
/// with an error, which still proves it's listening
const PROBE_TARGET: &str = "test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Direct,
    Relay,
}

impl Transport {
    pub fn flipped(self) -> Self {
        match self {
            Self::Direct => Self::Relay,
            Self::Relay => Self::Direct,
        }
    }
}

/// fatal failures as the playback engine reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackFailure {
    /// manifest or segment fetch failed, which is what cors blocks look like
    Network,
    /// the stream loaded but couldn't be decoded
    Media,
    /// no hls support at all
    Unsupported,
}

/// recoverable error state shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackAdvice {
    pub message: &'static str,
    pub hint: &'static str,
    pub offer_relay: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSource {
    upstream: String,
    relay_endpoint: String,
    relay_available: bool,
    transport: Transport,
}

impl PlaybackSource {
    pub fn new(
        upstream: impl Into<String>,
        relay_endpoint: impl Into<String>,
        relay_available: bool,
    ) -> Self {
        Self {
            upstream: upstream.into(),
            relay_endpoint: relay_endpoint.into(),
            relay_available,
            transport: Transport::Direct,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// the url handed to the playback engine
    pub fn stream_url(&self) -> String {
        match self.transport {
            Transport::Relay if self.relay_available => {
                relay_reference(&self.relay_endpoint, &self.upstream)
            }
            _ => self.upstream.clone(),
        }
    }

    pub fn advise(&self, failure: PlaybackFailure) -> FallbackAdvice {
        let offer_relay = failure == PlaybackFailure::Network
            && self.transport == Transport::Direct
            && self.relay_available;

        let message = match failure {
            PlaybackFailure::Network if offer_relay => {
                "Stream blocked by CORS. Try enabling the relay."
            }
            PlaybackFailure::Network => "Stream unavailable or geo-restricted",
            PlaybackFailure::Media => "Unable to play this stream",
            PlaybackFailure::Unsupported => "HLS not supported",
        };

        let hint = if offer_relay {
            "Enable the relay to retry through it"
        } else {
            "This stream may be geo-restricted or offline"
        };

        FallbackAdvice {
            message,
            hint,
            offer_relay,
        }
    }

    /// explicit user switch, the old playback state is dropped with `self`
    pub fn toggle(self) -> Self {
        let transport = self.transport.flipped();
        debug!("Switching playback transport to {:?}", transport);

        Self { transport, ..self }
    }
}

/// any http answer from the relay means it's up, only transport errors count as down
pub async fn probe_relay(client: &reqwest::Client, relay_endpoint: &str) -> bool {
    match client
        .get(relay_reference(relay_endpoint, PROBE_TARGET))
        .send()
        .await
    {
        Ok(response) => {
            debug!("Relay probe answered with {}", response.status());
            true
        }
        Err(e) => {
            debug!("Relay probe failed: {}", e);
            false
        }
    }
}
