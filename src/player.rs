use std::fmt;
use std::io::{self, Write};

use futures::StreamExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{interval, Duration, Instant, Interval};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PlayerConfig;
use crate::directory::{Directory, DirectoryError};
use crate::messages::{Address, Body, Envelope, InstanceId};
use crate::selection::{choose_peer, pass_delay};
use crate::utils::TimeoutHeap;

const NO_PEERS_NOTICE: &str = "No other players found. \
    Try adding players first and then starting the player with the hot potato last.";

// clear the current terminal line and return to its start
const CLEAR_LINE: &str = "\r\x1b[2K";

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("failed to register with the service directory: {0}")]
    Register(#[source] DirectoryError),

    #[error("presence query failed: {0}")]
    Presence(#[source] DirectoryError),

    #[error("failed to pass the hot potato: {0}")]
    Send(#[source] DirectoryError),

    #[error("failed to broadcast game over: {0}")]
    Broadcast(#[source] DirectoryError),

    #[error("the service directory ended the subscription")]
    Disconnected,
}

/// How a player's game ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// This player held the potato when it expired.
    Lost { result: String },
    /// Another player lost.
    GameOver { result: String },
    /// No one to pass the potato to.
    NoPeers,
}

enum Step {
    Continue,
    Finished(Outcome),
}

enum Event {
    Inbound(Option<Envelope>),
    Tick(u64),
    PassDue(Envelope),
}

/// Start-of-game countdown, ticking once per second from `secs` down to
/// zero. The first tick completes immediately.
struct Countdown {
    interval: Interval,
    remaining: u64,
}

impl Countdown {
    fn start(secs: u64) -> Self {
        Countdown {
            interval: interval(Duration::from_secs(1)),
            remaining: secs,
        }
    }

    async fn tick(&mut self) -> u64 {
        self.interval.tick().await;
        let remaining = self.remaining;
        self.remaining = remaining.saturating_sub(1);
        remaining
    }
}

/// Writes a countdown status line; a closed stdout does not stop the game.
fn status(line: fmt::Arguments<'_>) {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout.write_fmt(line).and_then(|()| stdout.flush()) {
        debug!(%err, "could not write status line");
    }
}

async fn next_tick(countdown: &mut Option<Countdown>) -> u64 {
    match countdown {
        Some(countdown) => countdown.tick().await,
        None => futures::future::pending().await,
    }
}

/// One participant of a hot potato game.
pub struct Player<D, C> {
    config: PlayerConfig,
    directory: D,
    clock: C,
    identity: InstanceId,
    rng: StdRng,
    countdown: Option<Countdown>,
    passes: TimeoutHeap<Envelope>,
}

impl<D, C> Player<D, C>
    where D: Directory,
          C: Clock,
{
    /// Registers with the directory under the configured service.
    pub async fn join(config: PlayerConfig, mut directory: D, clock: C)
        -> Result<Self, PlayerError>
    {
        let game = &config.game;
        let identity = directory
            .register(&game.service_name, &game.service_version)
            .await
            .map_err(PlayerError::Register)?;

        println!("Starting {} (v.{})", game.service_name, game.service_version);
        println!("Service ID: {}", identity);
        info!(player = %config.name, %identity, starter = config.starter, "joined game");

        Ok(Player {
            config,
            directory,
            clock,
            identity,
            rng: StdRng::from_entropy(),
            countdown: None,
            passes: TimeoutHeap::default(),
        })
    }

    pub fn identity(&self) -> &InstanceId {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Plays until the game is decided for this player, then leaves the
    /// directory.
    pub async fn run(mut self) -> Result<Outcome, PlayerError> {
        if self.config.starter {
            self.countdown = Some(Countdown::start(self.config.game.countdown_secs));
        }

        loop {
            let event = tokio::select! {
                inbound = self.directory.recv() => Event::Inbound(inbound),
                remaining = next_tick(&mut self.countdown) => Event::Tick(remaining),
                Some(message) = self.passes.next(), if !self.passes.is_empty() => {
                    Event::PassDue(message)
                }
            };

            let step = match event {
                Event::Inbound(Some(message)) => self.handle_message(message).await?,
                Event::Inbound(None) => return Err(PlayerError::Disconnected),
                Event::Tick(remaining) => self.handle_tick(remaining),
                Event::PassDue(message) => self.pass(message).await?,
            };

            if let Step::Finished(outcome) = step {
                if let Err(err) = self.directory.shutdown().await {
                    warn!(%err, "failed to leave the service directory");
                }
                return Ok(outcome);
            }
        }
    }

    fn own_address(&self) -> Address {
        Address::instance(self.identity.clone(), self.config.game.service_name.as_str())
    }

    async fn handle_message(&mut self, message: Envelope) -> Result<Step, PlayerError> {
        if !message.is_hot_potato() {
            debug!(kind = %message.kind, from = %message.from, "ignoring foreign message");
            return Ok(Step::Continue);
        }

        // an expired token loses whatever else its body says
        if let Some(expiration) = message.expiration() {
            if expiration < self.clock.unix_now() {
                return self.lose().await;
            }
        }

        let body: Body = match message.decode_body() {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, mid = %message.mid, "ignoring malformed hot potato message");
                return Ok(Step::Continue);
            }
        };

        match body {
            Body::GameOver { result } => {
                Ok(Step::Finished(self.game_over(result, false)))
            }
            Body::HotPotato { expiration } => {
                println!("[{}]: received hot potato.", self.config.name);
                debug!(mid = %message.mid, from = %message.from, expiration, "holding hot potato");
                self.schedule_pass(message);
                Ok(Step::Continue)
            }
        }
    }

    fn handle_tick(&mut self, remaining: u64) -> Step {
        if remaining > 0 {
            status(format_args!("{}Game starting in: {} seconds", CLEAR_LINE, remaining));
            return Step::Continue;
        }

        status(format_args!("{}Sending hot potato...\n", CLEAR_LINE));
        self.countdown = None;

        let expiration = self.clock.unix_now()
            .saturating_add(self.config.game.game_length_secs);
        let service = Address::service(self.config.game.service_name.as_str());
        let token = Envelope::hot_potato(
            service.clone(),
            service,
            &Body::HotPotato { expiration },
        );
        info!(mid = %token.mid, expiration, "created hot potato");
        self.schedule_pass(token);
        Step::Continue
    }

    fn schedule_pass(&mut self, message: Envelope) {
        let delay = pass_delay(&mut self.rng, self.config.game.pass_delay_ms());
        debug!(mid = %message.mid, ?delay, pending = self.passes.len() + 1,
               "passing hot potato later");
        self.passes.enqueue(message, Instant::now() + delay);
    }

    async fn pass(&mut self, mut message: Envelope) -> Result<Step, PlayerError> {
        let service = self.config.game.service_name.clone();
        let instances = self.directory.presence(&service)
            .await
            .map_err(PlayerError::Presence)?;

        let peer = match choose_peer(&mut self.rng, &self.identity, &instances) {
            Some(peer) => peer.id.clone(),
            None => {
                println!("{}", NO_PEERS_NOTICE);
                info!(live = instances.len(), "no other players found");
                return Ok(Step::Finished(Outcome::NoPeers));
            }
        };

        message.to = Address::instance(peer, service.as_str());
        message.from = self.own_address();
        debug!(mid = %message.mid, to = %message.to, "passing hot potato");
        self.directory.send(message).await.map_err(PlayerError::Send)?;
        Ok(Step::Continue)
    }

    async fn lose(&mut self) -> Result<Step, PlayerError> {
        let result = format!("Game over, {} lost!", self.config.name);
        let game_over = Envelope::hot_potato(
            Address::service(self.config.game.service_name.as_str()),
            self.own_address(),
            &Body::GameOver { result: result.clone() },
        );
        info!(mid = %game_over.mid, "hot potato expired in our hands");
        self.directory.broadcast(game_over).await.map_err(PlayerError::Broadcast)?;
        Ok(Step::Finished(self.game_over(result, true)))
    }

    fn game_over(&mut self, result: String, lost: bool) -> Outcome {
        println!("{}", result);
        self.countdown = None;
        if lost {
            Outcome::Lost { result }
        } else {
            Outcome::GameOver { result }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::GameConfig;
    use crate::directory::LocalHub;

    fn config(name: &str, starter: bool) -> PlayerConfig {
        PlayerConfig { name: name.to_string(), starter, game: GameConfig::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_down_to_zero_once_a_second() {
        let start = Instant::now();
        let mut countdown = Some(Countdown::start(3));
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_tick(&mut countdown).await);
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn join_registers_under_the_service_name() {
        let hub = LocalHub::new();
        let player = Player::join(config("alice", false), hub.connect(), TokioClock::starting_at(0))
            .await
            .unwrap();
        let live = hub.instances("hpp");
        assert_eq!(live.len(), 1);
        assert_eq!(&live[0].id, player.identity());
        assert_eq!(player.name(), "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_and_foreign_messages_are_skipped() {
        let hub = LocalHub::new();
        let mut peer = hub.connect();
        let peer_id = peer.register("hpp", "test").await.unwrap();
        let player = Player::join(config("bob", false), hub.connect(), TokioClock::starting_at(0))
            .await
            .unwrap();
        let to = Address::instance(player.identity().clone(), "hpp");
        let from = Address::instance(peer_id, "hpp");

        let mut garbled = Envelope::hot_potato(to.clone(), from.clone(), &Body::HotPotato { expiration: 0 });
        garbled.body = serde_json::json!({ "command": "juggle" });
        peer.send(garbled).await.unwrap();
        peer.send(Envelope::new(to.clone(), from.clone(), "chat", &"hi")).await.unwrap();
        peer.send(Envelope::hot_potato(to, from, &Body::GameOver { result: "done".into() }))
            .await
            .unwrap();

        let outcome = player.run().await.unwrap();
        assert_eq!(outcome, Outcome::GameOver { result: "done".to_string() });
        assert_eq!(hub.traffic().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn token_expiration_saturates_at_the_end_of_time() {
        let hub = LocalHub::new();
        let player = Player::join(
            config("alice", true),
            hub.connect(),
            TokioClock::starting_at(i64::MAX - 100),
        )
        .await
        .unwrap();

        // alone in the game, so the token is created and never sent
        assert_eq!(player.run().await.unwrap(), Outcome::NoPeers);
        assert!(hub.traffic().is_empty());
    }
}
