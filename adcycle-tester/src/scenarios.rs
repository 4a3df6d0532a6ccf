//! Named simulation scenarios and the behaviour each one must show.

use adcycle_core::{Cycle, RewardConfig, SdkConfig, Threshold, VignetteConfig};
use anyhow::{Result, ensure};

use crate::logic::{Action, ErrorMode, NetworkProfile, RunSummary, SimulationPlan};

pub struct Scenario {
    pub key: &'static str,
    pub description: &'static str,
    build: fn() -> SimulationPlan,
}

impl Scenario {
    #[must_use]
    pub fn plan(&self) -> SimulationPlan {
        (self.build)()
    }
}

const VIGNETTE: &str = "#google_vignette";
const FULLSCREEN: &str = "#goog_fullscreen_ad";

#[must_use]
pub fn catalog() -> Vec<Scenario> {
    vec![
        Scenario {
            key: "vignette-rotation",
            description: "Three vignettes switch to the preroll cycle and one preroll runs",
            build: vignette_rotation,
        },
        Scenario {
            key: "preroll-return",
            description: "Observed fullscreen ads bring the rotation back to vignettes",
            build: preroll_return,
        },
        Scenario {
            key: "missed-fallback",
            description: "Unmatched navigations reach the missed threshold and request a preroll",
            build: missed_fallback,
        },
        Scenario {
            key: "watchdog",
            description: "A long vignette drought is caught by the periodic watchdog",
            build: watchdog,
        },
        Scenario {
            key: "slow-network",
            description: "A manual preroll waits for the tag to become ready",
            build: slow_network,
        },
        Scenario {
            key: "tag-missing",
            description: "A tag that never loads exhausts the retry budget quietly",
            build: tag_missing,
        },
        Scenario {
            key: "interstitial-warmup",
            description: "Interstitial-unavailable push errors are retried until the push lands",
            build: interstitial_warmup,
        },
        Scenario {
            key: "fatal-push",
            description: "Any other push error abandons the break after one attempt",
            build: fatal_push,
        },
        Scenario {
            key: "stalled-sequence",
            description: "A preroll that never reports done times out and the sequence continues",
            build: stalled_sequence,
        },
        Scenario {
            key: "reward",
            description: "A reward break grants the reward and leaves the cycle counters alone",
            build: reward,
        },
        Scenario {
            key: "initial-once",
            description: "The one-shot initial preroll and reward fire once per session across reloads",
            build: initial_once,
        },
        Scenario {
            key: "reset-tracking",
            description: "Resetting tracking starts the counters over mid-session",
            build: reset_tracking,
        },
        Scenario {
            key: "teardown",
            description: "Cleanup cancels all timers and ignores later navigation",
            build: teardown,
        },
    ]
}

#[must_use]
pub fn find(key: &str) -> Option<Scenario> {
    catalog().into_iter().find(|scenario| scenario.key == key)
}

#[must_use]
pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    catalog()
        .into_iter()
        .map(|scenario| (scenario.key, scenario.description))
        .collect()
}

fn rotating_config() -> SdkConfig {
    SdkConfig::for_publisher("ca-pub-0000000000000000").with_vignette(VignetteConfig::active())
}

fn manual_config() -> SdkConfig {
    SdkConfig::for_publisher("ca-pub-0000000000000000")
}

fn record(summary: &RunSummary) -> Result<adcycle_core::AdCycleTracking> {
    summary
        .record
        .ok_or_else(|| anyhow::anyhow!("no tracking record after the run"))
}

fn vignette_rotation() -> SimulationPlan {
    SimulationPlan::new(rotating_config(), NetworkProfile::default(), 90_000)
        .navigate(2_000, VIGNETTE)
        .navigate(4_000, "#chapter-1")
        .navigate(8_000, VIGNETTE)
        .navigate(10_000, "#chapter-2")
        .navigate(14_000, VIGNETTE)
        .with_expectation(|summary| {
            let record = record(summary)?;
            ensure!(
                summary.network.preroll_pushes == 1,
                "expected one preroll push, saw {}",
                summary.network.preroll_pushes
            );
            ensure!(record.total_vignette_count == 3, "vignettes: {record:?}");
            ensure!(record.total_preroll_count == 1, "prerolls: {record:?}");
            ensure!(record.current_cycle == Cycle::Vignette, "cycle: {record:?}");
            ensure!(!summary.sequence_running, "sequence still running");
            Ok(())
        })
}

fn preroll_return() -> SimulationPlan {
    let vignette = VignetteConfig {
        preroll_to_vignette: Threshold::new(2, 1),
        ..VignetteConfig::active()
    };
    SimulationPlan::new(
        rotating_config().with_vignette(vignette),
        NetworkProfile::default(),
        20_000,
    )
    .navigate(1_000, FULLSCREEN)
    .navigate(2_000, "#story")
    .navigate(3_000, FULLSCREEN)
    .with_expectation(|summary| {
        let record = record(summary)?;
        ensure!(record.current_cycle == Cycle::Vignette, "cycle: {record:?}");
        ensure!(
            record.preroll_count == 0 && record.vignette_count == 0,
            "counters not reset: {record:?}"
        );
        ensure!(record.total_preroll_count == 2, "prerolls: {record:?}");
        ensure!(
            summary.network.preroll_pushes == 0,
            "observed prerolls must not trigger pushes"
        );
        Ok(())
    })
}

fn missed_fallback() -> SimulationPlan {
    SimulationPlan::new(rotating_config(), NetworkProfile::default(), 20_000)
        .navigate(1_000, "#home")
        .navigate(2_000, "#games")
        .with_expectation(|summary| {
            ensure!(
                summary.network.preroll_pushes == 1,
                "expected the fallback preroll, saw {} pushes",
                summary.network.preroll_pushes
            );
            let record = record(summary)?;
            ensure!(record.missed_vignette_count == 0, "missed not reset: {record:?}");
            Ok(())
        })
}

fn watchdog() -> SimulationPlan {
    SimulationPlan::new(rotating_config(), NetworkProfile::default(), 150_000)
        .navigate(1_000, VIGNETTE)
        .with_expectation(|summary| {
            ensure!(
                summary.network.preroll_pushes >= 1,
                "watchdog never requested a preroll"
            );
            ensure!(summary.listening, "listener should still be active");
            Ok(())
        })
}

fn slow_network() -> SimulationPlan {
    SimulationPlan::new(
        manual_config(),
        NetworkProfile::default().ready_after(Some(2_000)),
        30_000,
    )
    .at(500, Action::ShowPreroll)
    .with_expectation(|summary| {
        ensure!(summary.network.preroll_pushes == 1, "push never landed");
        ensure!(summary.hooks.break_done == 1, "adBreakDone not reported");
        ensure!(summary.pending_breaks == 0, "break left in flight");
        Ok(())
    })
}

fn tag_missing() -> SimulationPlan {
    SimulationPlan::new(
        manual_config(),
        NetworkProfile::default().ready_after(None),
        30_000,
    )
    .at(500, Action::ShowPreroll)
    .with_expectation(|summary| {
        ensure!(summary.network.preroll_pushes == 0, "pushed without a tag");
        ensure!(summary.hooks.break_done == 0, "a done hook fired for a dropped break");
        ensure!(summary.pending_timers == 0, "retry timers left behind");
        ensure!(summary.pending_breaks == 0, "abandoned break still tracked");
        Ok(())
    })
}

fn interstitial_warmup() -> SimulationPlan {
    SimulationPlan::new(
        manual_config(),
        NetworkProfile::default().errors(ErrorMode::InterstitialUnavailable { failures: 3 }),
        40_000,
    )
    .at(500, Action::ShowPreroll)
    .with_expectation(|summary| {
        ensure!(summary.network.rejected_pushes == 3, "rejections: {:?}", summary.network);
        ensure!(summary.network.preroll_pushes == 1, "push never landed");
        ensure!(summary.hooks.break_done == 1, "adBreakDone not reported");
        Ok(())
    })
}

fn fatal_push() -> SimulationPlan {
    SimulationPlan::new(
        manual_config(),
        NetworkProfile::default().errors(ErrorMode::Fatal),
        30_000,
    )
    .at(500, Action::ShowPreroll)
    .with_expectation(|summary| {
        ensure!(
            summary.network.rejected_pushes == 1,
            "fatal errors must not be retried: {:?}",
            summary.network
        );
        ensure!(summary.pending_timers == 0, "retry scheduled after a fatal error");
        Ok(())
    })
}

fn stalled_sequence() -> SimulationPlan {
    let vignette = VignetteConfig {
        vignette_to_preroll: Threshold::new(1, 2),
        ..VignetteConfig::active()
    };
    SimulationPlan::new(
        rotating_config().with_vignette(vignette),
        NetworkProfile::default().stalling(),
        60_000,
    )
    .navigate(1_000, VIGNETTE)
    .with_expectation(|summary| {
        ensure!(
            summary.network.preroll_pushes == 2,
            "second preroll not requested after the timeout ({} pushes)",
            summary.network.preroll_pushes
        );
        ensure!(summary.network.stalled == 1, "first break should have stalled");
        ensure!(!summary.sequence_running, "sequence never finished");
        ensure!(summary.pending_breaks == 0, "stalled break still tracked");
        Ok(())
    })
}

fn reward() -> SimulationPlan {
    SimulationPlan::new(
        rotating_config(),
        NetworkProfile::default().fill_rate(1.0),
        30_000,
    )
    .at(1_000, Action::ShowReward)
    .with_expectation(|summary| {
        ensure!(summary.network.reward_pushes == 1, "reward not pushed");
        ensure!(summary.hooks.rewards_granted == 1, "beforeReward not reported");
        ensure!(summary.network.rewards_shown == 1, "showAdFn never called");
        let record = record(summary)?;
        ensure!(record.total_preroll_count == 0, "reward counted as preroll");
        Ok(())
    })
}

fn initial_once() -> SimulationPlan {
    let vignette = VignetteConfig {
        initial_preroll_delay: 2_000,
        ..VignetteConfig::active()
    };
    let reward = RewardConfig {
        initial_reward_delay: 4_000,
        ..RewardConfig::default()
    };
    SimulationPlan::new(
        rotating_config().with_vignette(vignette).with_reward(reward),
        NetworkProfile::default(),
        60_000,
    )
    .at(20_000, Action::Reload)
    .at(40_000, Action::Reload)
    .with_expectation(|summary| {
        ensure!(summary.network.preroll_pushes == 1, "initial preroll repeated");
        ensure!(summary.network.reward_pushes == 1, "initial reward repeated");
        ensure!(
            summary.initial_preroll_flag && summary.initial_reward_flag,
            "session flags not set"
        );
        ensure!(summary.network.preloads == 3, "each page load preloads once");
        Ok(())
    })
}

fn reset_tracking() -> SimulationPlan {
    SimulationPlan::new(rotating_config(), NetworkProfile::default(), 20_000)
        .navigate(1_000, VIGNETTE)
        .navigate(2_000, "#next")
        .navigate(3_000, VIGNETTE)
        .at(5_000, Action::ResetTracking)
        .navigate(6_000, "#after-reset")
        .navigate(7_000, VIGNETTE)
        .with_expectation(|summary| {
            let record = record(summary)?;
            ensure!(record.total_vignette_count == 1, "reset ignored: {record:?}");
            ensure!(record.vignette_count == 1, "reset ignored: {record:?}");
            ensure!(summary.network.preroll_pushes == 0, "rotation advanced: {record:?}");
            Ok(())
        })
}

fn teardown() -> SimulationPlan {
    SimulationPlan::new(rotating_config(), NetworkProfile::default(), 120_000)
        .navigate(1_000, VIGNETTE)
        .navigate(2_000, "#page")
        .at(5_000, Action::Teardown)
        .navigate(10_000, VIGNETTE)
        .navigate(11_000, "#a")
        .navigate(12_000, "#b")
        .with_expectation(|summary| {
            let record = record(summary)?;
            ensure!(record.total_vignette_count == 1, "counted after cleanup: {record:?}");
            ensure!(summary.pending_timers == 0, "timers survived cleanup");
            ensure!(!summary.listening, "still listening after cleanup");
            ensure!(summary.network.preroll_pushes == 0, "pushed after cleanup");
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_and_findable() {
        let keys: Vec<_> = list_scenarios().into_iter().map(|(key, _)| key).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), keys.len());
        assert!(find("watchdog").is_some());
        assert!(find("nope").is_none());
    }

    #[test]
    fn every_plan_carries_an_expectation() {
        for scenario in catalog() {
            assert!(
                !scenario.plan().expectations.is_empty(),
                "{} has no expectation",
                scenario.key
            );
        }
    }
}
