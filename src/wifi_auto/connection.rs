//! Station-mode joins: one profile at a time, then every stored profile in order.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use embassy_time::Timer;

use super::{WifiAuto, WifiAutoEvent};
use crate::credential_store::ProfileStorage;
use crate::radio::Radio;
use crate::wifi_config::JoinPolicy;
use crate::Error;

/// Where a join stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinOutcome {
    Pending,
    Connected,
    /// The radio refused the join outright.
    Failed,
    /// The poll budget ran out before association.
    TimedOut,
}

/// One join against one network.
#[derive(Debug)]
pub struct ConnectionAttempt<'a> {
    name: &'a str,
    secret: &'a str,
    outcome: JoinOutcome,
}

impl<'a> ConnectionAttempt<'a> {
    #[must_use]
    pub const fn new(name: &'a str, secret: &'a str) -> Self {
        Self {
            name,
            secret,
            outcome: JoinOutcome::Pending,
        }
    }

    #[must_use]
    pub const fn outcome(&self) -> JoinOutcome {
        self.outcome
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Join, then poll [`Radio::is_joined`] every `poll_interval`, at most `poll_budget`
    /// times.
    ///
    /// Anything short of [`JoinOutcome::Connected`] disconnects the station again, so the
    /// radio is never left half-joined.
    pub async fn run<R: Radio>(&mut self, radio: &mut R, policy: &JoinPolicy) -> JoinOutcome {
        info!("Trying to connect to {}...", self.name);
        self.outcome = match radio.join(self.name, self.secret).await {
            Ok(()) => Self::poll(radio, policy).await,
            Err(Error::JoinFailed(status)) => {
                info!("Join of {} rejected with status {}", self.name, status);
                JoinOutcome::Failed
            }
            Err(err) => {
                warn!("Join of {} failed: {:?}", self.name, err);
                JoinOutcome::Failed
            }
        };
        if self.outcome == JoinOutcome::Connected {
            info!("Connected to {}", self.name);
        } else {
            radio.disconnect().await;
        }
        self.outcome
    }

    async fn poll<R: Radio>(radio: &mut R, policy: &JoinPolicy) -> JoinOutcome {
        for _ in 0..policy.poll_budget {
            if radio.is_joined() {
                return JoinOutcome::Connected;
            }
            Timer::after(policy.poll_interval).await;
        }
        if radio.is_joined() {
            JoinOutcome::Connected
        } else {
            JoinOutcome::TimedOut
        }
    }
}

impl<R: Radio, S: ProfileStorage> WifiAuto<R, S> {
    /// Try one network. `true` when the station ends up joined.
    pub async fn attempt_one(&self, name: &str, secret: &str) -> bool {
        let mut radio = self.radio.lock().await;
        let mut attempt = ConnectionAttempt::new(name, secret);
        let outcome = attempt.run(&mut *radio, &self.config.join_policy).await;
        if outcome == JoinOutcome::TimedOut {
            info!("Timed out joining {}", name);
        }
        outcome == JoinOutcome::Connected
    }

    /// Try every stored profile in store order, stopping at the first success.
    ///
    /// With nothing stored, the configured fallback profile is tried instead. It is never
    /// tried once the store holds at least one profile.
    pub async fn attempt_all(&self) -> bool {
        let profiles = self.store.lock().await.load();
        if profiles.is_empty() {
            info!("No stored WiFi profiles, trying the default network");
            self.events.signal(WifiAutoEvent::Connecting {
                try_index: 0,
                try_count: 1,
            });
            return self
                .attempt_one(&self.config.default_name, &self.config.default_secret)
                .await;
        }

        let try_count = profiles.len();
        for (try_index, (name, secret)) in profiles.iter().enumerate() {
            self.events.signal(WifiAutoEvent::Connecting {
                try_index,
                try_count,
            });
            if self.attempt_one(name, secret).await {
                return true;
            }
        }
        info!("None of {} stored profile(s) could be joined", try_count);
        false
    }
}
