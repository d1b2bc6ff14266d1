//! Holds logouts back for a while so that quick re-logins cancel out.

use std::collections::HashMap;
use std::time::Duration;

use auspex_state::{CharacterId, Event};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::EventBus;

#[derive(Debug)]
struct LogoutHold {
    event: Event,
    enqueued_at: Instant,
}

/// Sits between the stream client and the bus.
///
/// A logout is held for `delay`. A login for the same character inside that
/// window discards both events; otherwise the periodic flush publishes the
/// logout. Everything else passes straight through.
pub struct ReloginOmitter {
    bus: EventBus<Event>,
    holds: Mutex<HashMap<CharacterId, LogoutHold>>,
    delay: Duration,
    flush_interval: Duration,
}

impl ReloginOmitter {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(180);
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(bus: EventBus<Event>, delay: Duration, flush_interval: Duration) -> Self {
        Self {
            bus,
            holds: Mutex::new(HashMap::new()),
            delay,
            flush_interval,
        }
    }

    pub async fn submit(&self, event: Event) {
        match &event {
            Event::PlayerLogout(logout) => {
                let character_id = logout.character_id;
                let mut holds = self.holds.lock().await;
                if holds.contains_key(&character_id) {
                    debug!(%character_id, "logout already held");
                } else {
                    holds.insert(
                        character_id,
                        LogoutHold {
                            event,
                            enqueued_at: Instant::now(),
                        },
                    );
                }
                return;
            }
            Event::PlayerLogin(login) => {
                if self.holds.lock().await.remove(&login.character_id).is_some() {
                    debug!(character_id = %login.character_id, "re-login omitted");
                    return;
                }
            }
            _ => {}
        }
        self.bus.publish(event).await;
    }

    /// Publish every hold that is at least `delay` old, oldest first.
    /// Returns how many logouts were released.
    pub async fn flush(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.holds.lock().await.retain(|_, hold| {
            if now.saturating_duration_since(hold.enqueued_at) >= self.delay {
                expired.push((hold.enqueued_at, hold.event.clone()));
                false
            } else {
                true
            }
        });
        expired.sort_by_key(|(enqueued_at, _)| *enqueued_at);

        let released = expired.len();
        for (_, event) in expired {
            self.bus.publish(event).await;
        }
        if released > 0 {
            debug!(released, "flushed held logouts");
        }
        released
    }

    pub async fn held(&self) -> usize {
        self.holds.lock().await.len()
    }

    /// Flush on a fixed interval until cancelled. Holds still pending at
    /// shutdown are dropped.
    pub async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                now = ticker.tick() => {
                    self.flush(now).await;
                }
            }
        }
        let dropped = self.holds.lock().await.drain().count();
        info!(dropped, "re-login omitter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auspex_state::{Death, EventKind, Faction, PlayerLogin, PlayerLogout, WorldId, ZoneId};
    use std::sync::Arc;

    fn login(character: &str) -> Event {
        Event::PlayerLogin(PlayerLogin {
            character_id: CharacterId::from(character).unwrap(),
            world_id: WorldId(1),
            faction: Faction::Nc,
            outfit_id: None,
            timestamp: 0,
        })
    }

    fn logout(character: &str) -> Event {
        Event::PlayerLogout(PlayerLogout {
            character_id: CharacterId::from(character).unwrap(),
            world_id: WorldId(1),
            faction: Faction::Nc,
            outfit_id: None,
            timestamp: 0,
        })
    }

    fn omitter(bus: &EventBus<Event>) -> ReloginOmitter {
        ReloginOmitter::new(bus.clone(), Duration::from_secs(180), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_inside_window_is_omitted() {
        let bus = EventBus::new(16);
        let mut sub = bus
            .subscribe_many(&[EventKind::PlayerLogin, EventKind::PlayerLogout])
            .await;
        let omitter = omitter(&bus);

        omitter.submit(logout("a")).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        omitter.submit(login("a")).await;

        assert_eq!(omitter.held().await, 0);
        assert_eq!(omitter.flush(Instant::now() + Duration::from_secs(600)).await, 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_logout_flushes_once() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(EventKind::PlayerLogout).await;
        let omitter = omitter(&bus);

        let t0 = Instant::now();
        omitter.submit(logout("a")).await;

        assert_eq!(omitter.flush(t0 + Duration::from_secs(179)).await, 0);
        assert_eq!(omitter.flush(t0 + Duration::from_secs(180)).await, 1);
        assert_eq!(omitter.flush(t0 + Duration::from_secs(240)).await, 0);

        assert_eq!(sub.recv().await, Some(logout("a")));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_releases_oldest_first() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(EventKind::PlayerLogout).await;
        let omitter = omitter(&bus);

        for character in ["c", "a", "b"] {
            omitter.submit(logout(character)).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        omitter.flush(Instant::now() + Duration::from_secs(180)).await;

        for expected in ["c", "a", "b"] {
            assert_eq!(sub.recv().await, Some(logout(expected)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_logout_keeps_first_hold() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(EventKind::PlayerLogout).await;
        let omitter = omitter(&bus);

        let t0 = Instant::now();
        omitter.submit(logout("a")).await;
        tokio::time::advance(Duration::from_secs(100)).await;
        omitter.submit(logout("a")).await;

        assert_eq!(omitter.held().await, 1);
        assert_eq!(omitter.flush(t0 + Duration::from_secs(180)).await, 1);
        assert_eq!(sub.recv().await, Some(logout("a")));
    }

    #[tokio::test]
    async fn test_login_without_hold_and_other_events_pass_through() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_many(&[EventKind::PlayerLogin, EventKind::Death]).await;
        let omitter = omitter(&bus);
        let death = Event::Death(Death {
            character_id: CharacterId::from("a").unwrap(),
            attacker_character_id: CharacterId::from("b").unwrap(),
            attacker_weapon_id: 80,
            is_headshot: true,
            world_id: WorldId(1),
            zone_id: ZoneId(2),
            timestamp: 0,
        });

        omitter.submit(login("a")).await;
        // A held logout for the same character does not delay other kinds.
        omitter.submit(logout("a")).await;
        omitter.submit(death.clone()).await;

        assert_eq!(sub.try_recv(), Some(login("a")));
        assert_eq!(sub.try_recv(), Some(death));
        assert_eq!(sub.try_recv(), None);
        assert_eq!(omitter.held().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_interval() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(EventKind::PlayerLogout).await;
        let omitter = Arc::new(omitter(&bus));
        let token = CancellationToken::new();

        omitter.submit(logout("a")).await;
        let task = tokio::spawn({
            let omitter = omitter.clone();
            let token = token.clone();
            async move { omitter.run(token).await }
        });

        // Ticks at 60s, 120s and 180s; the last one releases the hold.
        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(sub.recv().await, Some(logout("a")));

        token.cancel();
        task.await.unwrap().unwrap();
    }
}
