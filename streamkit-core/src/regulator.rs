//! Bitrate regulator: a periodic control loop that reads transport stats
//! from a reliable-UDP sink and adjusts encoder bitrate targets through two
//! callbacks the pipeline wires up. The regulator never touches a muxer or
//! sink directly.

use crate::config::RegulatorConfig;
use crate::sink::srt::TransportStats;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// New encoder targets for one tick. `audio_bitrate` is `None` when the
/// regulator leaves audio alone this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateTargets {
    pub video_bitrate: u32,
    pub audio_bitrate: Option<u32>,
}

/// Implements the default bitrate policy. Kept as a free function so a
/// caller can unit test or replace the policy without the tokio loop
/// around it.
pub fn apply_policy(
    config: &RegulatorConfig,
    stats: &TransportStats,
    current_video_bitrate: u32,
    current_audio_bitrate: u32,
    consecutive_healthy_ticks: u32,
) -> (BitrateTargets, u32) {
    let lost_fraction = if stats.pkt_sent_total == 0 {
        0.0
    } else {
        stats.pkt_snd_loss_total as f64 / stats.pkt_sent_total as f64
    };
    // No explicit send-buffer-fill field is modeled on this transport (see
    // TransportStats doc comment); mbps_bandwidth relative to the current
    // target stands in for "send buffer filling up" congestion signal.
    let buffer_fill = if current_video_bitrate == 0 {
        0.0
    } else {
        1.0 - (stats.mbps_bandwidth * 1_000_000.0 / current_video_bitrate as f64).min(1.0)
    };

    let congested = lost_fraction > 0.02 || buffer_fill > 0.80;
    let healthy = lost_fraction < 0.005 && buffer_fill < 0.40;

    let (mut video_bitrate, mut healthy_ticks) = (current_video_bitrate, consecutive_healthy_ticks);
    if congested {
        video_bitrate = (current_video_bitrate as f64 * 0.8) as u32;
        healthy_ticks = 0;
    } else if healthy {
        healthy_ticks += 1;
        if healthy_ticks >= 3 {
            video_bitrate = (current_video_bitrate as f64 * 1.1) as u32;
            healthy_ticks = 0;
        }
    } else {
        healthy_ticks = 0;
    }
    video_bitrate = video_bitrate.clamp(config.min_video_bitrate, config.max_video_bitrate);

    let audio_bitrate = if video_bitrate <= config.min_video_bitrate && congested {
        Some((current_audio_bitrate / 2).clamp(config.min_audio_bitrate, config.max_audio_bitrate))
    } else {
        None
    };

    (
        BitrateTargets {
            video_bitrate,
            audio_bitrate,
        },
        healthy_ticks,
    )
}

/// Runs `apply_policy` on a `tokio::time::interval` tick, reading stats via
/// `stats_source` and publishing the new targets on a `watch` channel the
/// encoder side observes.
pub struct Regulator {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Regulator {
    pub fn spawn<F>(config: RegulatorConfig, initial_video_bitrate: u32, initial_audio_bitrate: u32, stats_source: F) -> (Self, watch::Receiver<BitrateTargets>)
    where
        F: Fn() -> TransportStats + Send + 'static,
    {
        let (targets_tx, targets_rx) = watch::channel(BitrateTargets {
            video_bitrate: initial_video_bitrate,
            audio_bitrate: None,
        });
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(config.period_ms as u64));
            let mut video_bitrate = initial_video_bitrate;
            let mut audio_bitrate = initial_audio_bitrate;
            let mut healthy_ticks = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let stats = stats_source();
                        let (targets, next_healthy) = apply_policy(&config, &stats, video_bitrate, audio_bitrate, healthy_ticks);
                        healthy_ticks = next_healthy;
                        video_bitrate = targets.video_bitrate;
                        if let Some(a) = targets.audio_bitrate {
                            audio_bitrate = a;
                        }
                        debug!(video_bitrate, audio_bitrate, "bitrate regulator tick");
                        if targets_tx.send(targets).is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        (
            Regulator {
                handle,
                shutdown: shutdown_tx,
            },
            targets_rx,
        )
    }

    /// Signals the regulator task to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(sent: u64, lost: u64, mbps: f64) -> TransportStats {
        TransportStats {
            pkt_sent_total: sent,
            pkt_snd_loss_total: lost,
            pkt_retrans_total: 0,
            byte_snd_buf: 0,
            ms_rtt: 20.0,
            mbps_bandwidth: mbps,
        }
    }

    #[test]
    fn high_loss_cuts_video_bitrate_by_point_eight() {
        let config = RegulatorConfig::default();
        let s = stats(1000, 30, 1.0); // 3% loss
        let (targets, _) = apply_policy(&config, &s, 2_000_000, 128_000, 0);
        assert_eq!(targets.video_bitrate, 1_600_000);
    }

    #[test]
    fn three_healthy_ticks_raise_bitrate_by_point_one() {
        let config = RegulatorConfig::default();
        let s = stats(1000, 0, 3.0);
        let (t1, h1) = apply_policy(&config, &s, 2_000_000, 128_000, 0);
        assert_eq!(t1.video_bitrate, 2_000_000);
        let (t2, h2) = apply_policy(&config, &s, t1.video_bitrate, 128_000, h1);
        assert_eq!(t2.video_bitrate, 2_000_000);
        let (t3, _) = apply_policy(&config, &s, t2.video_bitrate, 128_000, h2);
        assert_eq!(t3.video_bitrate, 2_200_000);
    }

    #[test]
    fn bitrate_is_clamped_to_configured_bounds() {
        let config = RegulatorConfig {
            min_video_bitrate: 500_000,
            max_video_bitrate: 1_000_000,
            ..RegulatorConfig::default()
        };
        let s = stats(1000, 100, 1.0); // 10% loss, heavy congestion
        let (targets, _) = apply_policy(&config, &s, 500_000, 64_000, 0);
        assert_eq!(targets.video_bitrate, 500_000);
    }

    #[test]
    fn audio_follows_halving_rule_only_at_video_floor_under_congestion() {
        let config = RegulatorConfig::default();
        let s = stats(1000, 100, 1.0);
        let (targets, _) = apply_policy(&config, &s, config.min_video_bitrate, 128_000, 0);
        assert_eq!(targets.audio_bitrate, Some(64_000));
    }

    #[tokio::test(start_paused = true)]
    async fn regulator_publishes_ticks_on_watch_channel() {
        let config = RegulatorConfig {
            period_ms: 10,
            ..RegulatorConfig::default()
        };
        let (regulator, mut rx) = Regulator::spawn(config, 2_000_000, 128_000, || stats(1000, 0, 3.0));
        tokio::time::advance(Duration::from_millis(15)).await;
        rx.changed().await.unwrap();
        let targets = *rx.borrow();
        assert_eq!(targets.video_bitrate, 2_000_000);
        regulator.stop().await;
    }
}
