//! The control loop: subscribe, assemble frames, correlate, emit.

use crate::announce::Announcer;
use crate::assembler::FrameAssembler;
use crate::correlate::{Correlator, FrameOutcome};
use crate::egress::{self, FramePublisher};
use crate::naming::NamingIngestor;
use crate::settings::Settings;
use crate::stop::StopSignal;
use crate::wire::{decode_record, RawMessage};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::{pull, DeliverPolicy}};
use futures::StreamExt;
use opentelemetry::KeyValue;
use overlay_core::{clear_ready, mark_ready, start_health_server, ANNOTATOR_METRICS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Subscribes to `subject` and forwards every message into `tx` until either side closes.
async fn spawn_forwarder<T, F>(client: &async_nats::Client, subject: String, tx: mpsc::Sender<T>, map: F) -> Result<()>
where
    T: Send + 'static,
    F: Fn(async_nats::Message) -> T + Send + 'static,
{
    let mut sub = client.subscribe(subject.clone()).await.with_context(|| format!("subscribe {subject}"))?;
    tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            if tx.send(map(msg)).await.is_err() { break; }
        }
        debug!(%subject, "subscription forwarder ended");
    });
    Ok(())
}

/// Ordered consumer over the stream that retains `subject`, starting at its first message.
async fn naming_replay(client: &async_nats::Client, subject: &str) -> Result<pull::Ordered> {
    let js = jetstream::new(client.clone());
    let stream_name = js.stream_by_subject(subject).await.with_context(|| format!("no stream retains {subject}"))?;
    let stream = js.get_stream(&stream_name).await.with_context(|| format!("stream {stream_name}"))?;
    let consumer = stream
        .create_consumer(pull::OrderedConfig {
            filter_subject: subject.to_string(),
            deliver_policy: DeliverPolicy::All,
            ..Default::default()
        })
        .await
        .with_context(|| format!("ordered consumer on {stream_name}"))?;
    Ok(consumer.messages().await?)
}

/// Feeds naming records into `tx`, replayed from the earliest retained record when a
/// JetStream stream covers the subject. Without one, only records published from now on are seen.
pub async fn spawn_naming_reader(client: &async_nats::Client, subject: String, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
    let messages = match naming_replay(client, &subject).await {
        Ok(m) => m,
        Err(e) => {
            warn!(error=%format!("{e:#}"), %subject, "naming replay unavailable, live subscription only");
            return spawn_forwarder(client, subject, tx, |m| m.payload.to_vec()).await;
        }
    };
    info!(%subject, "naming replay from earliest retained record");
    tokio::spawn(async move {
        let mut messages = std::pin::pin!(messages);
        while let Some(next) = messages.next().await {
            match next {
                Ok(m) => if tx.send(m.payload.to_vec()).await.is_err() { break; },
                Err(e) => warn!(error=%e, %subject, "naming replay error"),
            }
        }
        debug!(%subject, "naming reader ended");
    });
    Ok(())
}

/// Everything the loop needs to turn one frame outcome into egress.
struct Sinks {
    display: bool,
    publisher: Option<FramePublisher>,
    announcer: Announcer,
}

impl Sinks {
    async fn emit(&mut self, outcome: FrameOutcome) {
        for a in &outcome.announcements { self.announcer.announce(a).await; }
        for frame in &outcome.frames {
            if self.display { egress::display(frame); }
            if let Some(p) = self.publisher.as_mut() { p.publish(frame).await; }
        }
    }
}

pub async fn run(settings: Settings) -> Result<()> {
    let cfg = &settings.config;
    if cfg.health_port != 0 { start_health_server(cfg.health_port).await?; }

    let client = async_nats::connect(settings.broker.as_str()).await
        .with_context(|| format!("connecting to {}", settings.broker))?;
    info!(broker=%settings.broker, prefix=%settings.prefix, mode=?settings.mode, "connected");

    let (input_tx, mut input_rx) = mpsc::channel::<RawMessage>(cfg.channel_capacity);
    for subject in settings.input_subjects() {
        spawn_forwarder(&client, subject, input_tx.clone(), RawMessage::from_nats).await?;
    }
    drop(input_tx);
    let (naming_tx, naming_rx) = mpsc::channel::<Vec<u8>>(cfg.channel_capacity);
    spawn_naming_reader(&client, cfg.naming_subject.clone(), naming_tx).await?;

    let mut sinks = Sinks {
        display: settings.display,
        publisher: settings.output.then(|| FramePublisher::new(client.clone(), settings.prefix.clone(), cfg.flush_every)),
        announcer: Announcer::new(client.clone(), cfg.announce_subject.clone()),
    };
    let mut assembler = FrameAssembler::new(cfg.latency_ms).with_max_lead(cfg.max_lead_ms);
    let mut correlator = Correlator::new(settings.mode, cfg.reid_source_ids.clone());
    let mut naming = NamingIngestor::new(naming_rx, cfg.naming_poll());
    let stop = StopSignal::install(settings.display);
    mark_ready();
    info!(cameras=?cfg.camera_ids, reid_sources=?cfg.reid_source_ids, "annotator ready");

    while !stop.is_stopped() {
        let ready = match tokio::time::timeout(cfg.idle_flush(), input_rx.recv()).await {
            Ok(Some(raw)) => {
                match decode_record(&settings.prefix, &raw) {
                    Ok(rec) => assembler.push(rec),
                    Err(e) => {
                        ANNOTATOR_METRICS.records_rejected_total.add(1, &[KeyValue::new("subject", raw.subject.clone())]);
                        warn!(error=%e, subject=%raw.subject, "input record rejected");
                    }
                }
                std::iter::from_fn(|| assembler.pop_ready()).collect::<Vec<_>>()
            }
            Ok(None) => { info!("all input subscriptions closed"); break; }
            Err(_) => assembler.drain_all(),
        };
        for bundle in ready {
            let outcome = correlator.process(bundle, &mut naming).await;
            sinks.emit(outcome).await;
        }
    }

    clear_ready();
    for bundle in assembler.drain_all() {
        let outcome = correlator.process(bundle, &mut naming).await;
        sinks.emit(outcome).await;
    }
    if let Some(p) = sinks.publisher.as_ref() { p.flush().await; }
    if let Err(e) = client.flush().await { warn!(error=%e, "final flush failed"); }
    info!(registrations=correlator.store().len(), dropped_late=assembler.dropped_late(), "annotator stopped");
    Ok(())
}
