//! Wiring for one platform: stream client, re-login omitter, bus, tracker and
//! the announcements logger, packaged as a supervisor subtree.

use std::sync::Arc;
use std::time::Duration;

use auspex_state::reference;
use auspex_state::{Event, EventKind, Platform, PlatformTracker, Trackers};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{EventBus, Subscription};
use crate::omitter::ReloginOmitter;
use crate::stream::{ConnectionState, StreamClient, StreamSettings};
use crate::supervisor::Supervisor;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("tracker queue for {platform} overflowed, dropped {dropped} events")]
    TrackerOverflow { platform: Platform, dropped: u64 },

    #[error("tracker cannot apply a {0} event")]
    UnexpectedEvent(EventKind),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub stream: StreamSettings,
    pub bus_capacity: usize,
    pub relogin_delay: Duration,
    pub relogin_flush_interval: Duration,
}

/// Observers for a running platform subtree.
#[derive(Debug, Clone)]
pub struct PlatformHandle {
    pub platform: Platform,
    pub ready: watch::Receiver<bool>,
    pub connection: watch::Receiver<ConnectionState>,
}

/// Kinds the tracker folds into presence state.
pub fn tracked_kinds() -> Vec<EventKind> {
    let mut kinds = vec![EventKind::PlayerLogin, EventKind::PlayerLogout];
    kinds.extend(EventKind::ZONE_ACTIONS);
    kinds
}

pub const ANNOUNCED_KINDS: [EventKind; 3] = [
    EventKind::MetagameEvent,
    EventKind::ContinentLock,
    EventKind::FacilityControl,
];

/// Build the supervisor subtree for `platform`. Subscriptions are registered
/// here, before anything can publish.
pub async fn build(
    platform: Platform,
    settings: &PipelineSettings,
    trackers: &Trackers,
) -> (Supervisor, PlatformHandle) {
    let tracker = trackers.track(platform).await;
    let bus = EventBus::<Event>::new(settings.bus_capacity);
    let tracker_feed = bus.subscribe_many(&tracked_kinds()).await;
    let announcements = bus.subscribe_many(&ANNOUNCED_KINDS).await;

    let omitter = Arc::new(ReloginOmitter::new(
        bus.clone(),
        settings.relogin_delay,
        settings.relogin_flush_interval,
    ));
    let client = Arc::new(StreamClient::new(
        platform,
        settings.stream.clone(),
        omitter.clone(),
    ));
    let (ready, ready_rx) = watch::channel(false);
    let ready = Arc::new(ready);

    let handle = PlatformHandle {
        platform,
        ready: ready_rx,
        connection: client.state(),
    };

    let supervisor = Supervisor::new(platform.as_str())
        .unit("stream", move |token| async move {
            client.run(token).await.map_err(anyhow::Error::from)
        })
        .unit("omitter", move |token| async move { omitter.run(token).await })
        .unit("tracker", move |token| {
            run_tracker(tracker, tracker_feed, token)
        })
        .unit("announcements", move |token| {
            run_announcements(platform, announcements, token)
        })
        .post_start("ready", {
            let ready = ready.clone();
            move || async move {
                ready.send_replace(true);
                info!(%platform, "platform ready");
                anyhow::Ok(())
            }
        })
        .pre_stop("close bus", move || async move {
            bus.close().await;
            anyhow::Ok(())
        })
        .post_stop("not ready", move || async move {
            ready.send_replace(false);
            anyhow::Ok(())
        });

    (supervisor, handle)
}

/// Fold one event into the tracker.
pub async fn apply(tracker: &PlatformTracker, event: &Event) -> Result<(), PipelineError> {
    match event {
        Event::PlayerLogin(login) => tracker.handle_login(login).await,
        Event::PlayerLogout(logout) => tracker.handle_logout(logout).await,
        other if EventKind::ZONE_ACTIONS.contains(&other.kind()) => {
            for action in other.zone_actions() {
                tracker
                    .handle_zone_action(action.world_id, action.zone_id, &action.character_id)
                    .await;
            }
        }
        other => return Err(PipelineError::UnexpectedEvent(other.kind())),
    }
    Ok(())
}

/// Drops on the tracker's own queue are fatal; other subscribers falling behind
/// is not.
async fn run_tracker(
    tracker: Arc<PlatformTracker>,
    mut feed: Subscription<Event>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let platform = tracker.platform();
    loop {
        let dropped = feed.dropped();
        if dropped > 0 {
            return Err(PipelineError::TrackerOverflow { platform, dropped }.into());
        }
        tokio::select! {
            _ = token.cancelled() => break,
            event = feed.recv() => match event {
                Some(event) => apply(&tracker, &event).await?,
                None => break,
            },
        }
    }
    feed.unsubscribe().await;
    let online = tracker.online_count().await;
    debug!(%platform, online, "tracker stopped");
    Ok(())
}

async fn run_announcements(
    platform: Platform,
    mut feed: Subscription<Event>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = feed.recv() => match event {
                Some(event) => announce(platform, &event),
                None => break,
            },
        }
    }
    feed.unsubscribe().await;
    Ok(())
}

fn announce(platform: Platform, event: &Event) {
    let world = |id| reference::world(id).map_or("unknown", |w| w.name);
    let zone = |id| reference::zone(id).map_or("unknown", |z| z.name);
    match event {
        Event::MetagameEvent(e) => info!(
            %platform,
            world = world(e.world_id),
            zone = zone(e.zone_id),
            metagame_event_id = e.metagame_event_id,
            state = %e.metagame_event_state_name,
            "metagame event"
        ),
        Event::ContinentLock(e) => info!(
            %platform,
            world = world(e.world_id),
            zone = zone(e.zone_id),
            faction = ?e.triggering_faction,
            "continent locked"
        ),
        Event::FacilityControl(e) if e.new_faction != e.old_faction => info!(
            %platform,
            world = world(e.world_id),
            zone = zone(e.zone_id),
            facility_id = e.facility_id,
            from = ?e.old_faction,
            to = ?e.new_faction,
            outfit_id = ?e.outfit_id,
            "facility captured"
        ),
        Event::FacilityControl(e) => debug!(
            %platform,
            world = world(e.world_id),
            facility_id = e.facility_id,
            "facility defended"
        ),
        _ => {}
    }
}
