//! One end-to-end refresh cycle against the change oracle.

use bstr::{BStr, BString};
use tracing::{debug, warn};

use strata_index::{Index, CHANGE_MONITOR};

use crate::invalidate;
use crate::oracle::{Oracle, QueryOutcome};
use crate::settings::{MonitorMode, MonitorSettings};
use crate::MonitorState;

/// Paths in one response above which the index is forced to be written
/// back so the newer token is persisted. The response may be full of
/// paths that flip no flag bits (ignored build output, say); without a
/// rewrite the stale token stays in the extension and every subsequent
/// command replays the same huge delta. The exact value is not
/// important; the first real flag change rewrites the index anyway.
const FORCE_UPDATE_THRESHOLD: usize = 100;

pub(crate) fn run_refresh(
    settings: &MonitorSettings,
    state: &mut MonitorState,
    index: &mut Index,
    oracle: &mut dyn Oracle,
) {
    if let Some(reason) = settings.incompatible {
        if !state.warned_incompatible {
            state.warned_incompatible = true;
            warn!(%reason, "filesystem monitor is unavailable");
        }
    }

    if settings.mode == MonitorMode::Disabled || state.has_run_once {
        return;
    }
    state.has_run_once = true;

    debug!("refresh monitor");
    let outcome = oracle.query(state.last_token.as_ref().map(|t| BStr::new(t)));

    let new_token: BString = match outcome {
        QueryOutcome::Paths { token, paths } => {
            let mut count = 0usize;
            for path in &paths {
                invalidate::invalidate_path(index, settings.case_insensitive, BStr::new(path));
                count += 1;
            }

            // The oracle answered for this token, so the untracked
            // cache may rely on it from here on.
            if let Some(untracked) = index.untracked.as_mut() {
                untracked.use_monitor = true;
            }

            if count > FORCE_UPDATE_THRESHOLD {
                index.changed |= CHANGE_MONITOR;
            }

            debug!(count, "applied monitor response");
            token
        }
        QueryOutcome::Trivial { token } => {
            debug!("trivial monitor response");
            invalidate_all(index);
            token
        }
        QueryOutcome::Failed => {
            if !state.warned_unavailable {
                state.warned_unavailable = true;
                warn!("change oracle unavailable; treating every entry as possibly modified");
            }
            invalidate_all(index);
            oracle.fallback_token()
        }
    };

    // Install the token only after the results are applied.
    state.last_token = Some(new_token);
}

/// Clear every CLEAN bit. The index is flagged for rewrite only when a
/// bit actually flipped, and the untracked cache stops trusting the
/// oracle until a usable response arrives.
fn invalidate_all(index: &mut Index) {
    let mut flipped = false;
    for entry in index.entries_mut() {
        if entry.is_clean() {
            flipped = true;
            entry.clear_clean();
        }
    }
    if flipped {
        index.changed |= CHANGE_MONITOR;
    }
    if let Some(untracked) = index.untracked.as_mut() {
        untracked.use_monitor = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedOracle;
    use strata_index::{UntrackedCache, MODE_FILE};

    fn index_of(names: &[&str]) -> Index {
        let mut index = Index::new();
        for name in names {
            index.add(*name, MODE_FILE);
        }
        for entry in index.entries_mut() {
            entry.set_clean();
        }
        index.untracked = Some(UntrackedCache::new());
        index
    }

    fn settings(mode: MonitorMode) -> MonitorSettings {
        MonitorSettings {
            mode,
            ..MonitorSettings::default()
        }
    }

    fn state_with_token(token: &str) -> MonitorState {
        MonitorState {
            last_token: Some(BString::from(token)),
            ..MonitorState::default()
        }
    }

    fn paths(token: &str, names: &[&str]) -> QueryOutcome {
        QueryOutcome::Paths {
            token: BString::from(token),
            paths: names.iter().map(|n| BString::from(*n)).collect(),
        }
    }

    #[test]
    fn test_single_file_event() {
        let mut index = index_of(&["a", "b/c", "b/d", "e"]);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![paths("tok2", &["b/c"])]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        let clean: Vec<_> = index.entries().iter().map(|e| e.is_clean()).collect();
        assert_eq!(clean, vec![true, false, true, true]);
        assert_eq!(state.last_token, Some(BString::from("tok2")));
        assert!(index.untracked.as_ref().unwrap().use_monitor);
    }

    #[test]
    fn test_directory_event() {
        let mut index = index_of(&["a", "b/c", "b/d", "e"]);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![paths("tok2", &["b/"])]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        let clean: Vec<_> = index.entries().iter().map(|e| e.is_clean()).collect();
        assert_eq!(clean, vec![true, false, false, true]);
    }

    #[test]
    fn test_trivial_response_invalidates_everything() {
        let mut index = index_of(&["a", "b", "c"]);
        index.untracked.as_mut().unwrap().use_monitor = true;
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![QueryOutcome::Trivial {
            token: BString::from("tok2"),
        }]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        assert!(index.entries().iter().all(|e| !e.is_clean()));
        assert_ne!(index.changed & CHANGE_MONITOR, 0);
        assert!(!index.untracked.as_ref().unwrap().use_monitor);
        assert_eq!(state.last_token, Some(BString::from("tok2")));
    }

    #[test]
    fn test_trivial_response_with_nothing_clean_does_not_flag_rewrite() {
        let mut index = index_of(&["a", "b"]);
        for entry in index.entries_mut() {
            entry.clear_clean();
        }
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![QueryOutcome::Trivial {
            token: BString::from("tok2"),
        }]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        assert_eq!(index.changed & CHANGE_MONITOR, 0);
    }

    #[test]
    fn test_failed_query_invalidates_and_stores_fallback_token() {
        let mut index = index_of(&["a", "b"]);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![QueryOutcome::Failed]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        assert!(index.entries().iter().all(|e| !e.is_clean()));
        assert_eq!(state.last_token, Some(BString::from("fallback-token")));
        assert!(state.warned_unavailable);
    }

    #[test]
    fn test_empty_path_list_still_marks_untracked_cache_usable() {
        let mut index = index_of(&["a"]);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![paths("tok2", &[])]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        assert!(index.entry(0).is_clean());
        assert!(index.untracked.as_ref().unwrap().use_monitor);
        assert_eq!(state.last_token, Some(BString::from("tok2")));
    }

    #[test]
    fn test_refresh_runs_at_most_once_per_process() {
        let mut index = index_of(&["a"]);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![paths("tok2", &[]), paths("tok3", &[])]);

        let settings = settings(MonitorMode::Ipc);
        run_refresh(&settings, &mut state, &mut index, &mut oracle);
        run_refresh(&settings, &mut state, &mut index, &mut oracle);

        assert_eq!(oracle.queries, 1);
        assert_eq!(state.last_token, Some(BString::from("tok2")));
    }

    #[test]
    fn test_disabled_mode_never_queries() {
        let mut index = index_of(&["a"]);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![paths("tok2", &[])]);

        run_refresh(&settings(MonitorMode::Disabled), &mut state, &mut index, &mut oracle);

        assert_eq!(oracle.queries, 0);
        assert!(!state.has_run_once);
        assert_eq!(state.last_token, Some(BString::from("tok1")));
    }

    #[test]
    fn test_threshold_forces_index_rewrite() {
        let names: Vec<String> = (0..=FORCE_UPDATE_THRESHOLD)
            .map(|i| format!("f{:04}", i))
            .collect();
        let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let mut index = index_of(&name_refs);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![paths("tok2", &name_refs)]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        assert!(index.entries().iter().all(|e| !e.is_clean()));
        assert_ne!(index.changed & CHANGE_MONITOR, 0);
    }

    #[test]
    fn test_threshold_is_strictly_greater_than() {
        let names: Vec<String> = (0..FORCE_UPDATE_THRESHOLD)
            .map(|i| format!("f{:04}", i))
            .collect();
        let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let mut index = index_of(&name_refs);
        let mut state = state_with_token("tok1");
        let mut oracle = ScriptedOracle::new(vec![paths("tok2", &name_refs)]);

        run_refresh(&settings(MonitorMode::Ipc), &mut state, &mut index, &mut oracle);

        // Exactly the threshold count of paths does not force a rewrite.
        assert_eq!(index.changed & CHANGE_MONITOR, 0);
    }

    #[test]
    fn test_incompatibility_warns_once() {
        use crate::settings::Incompatibility;

        let mut index = index_of(&["a"]);
        let mut state = MonitorState::default();
        let mut oracle = ScriptedOracle::new(vec![]);
        let settings = MonitorSettings {
            mode: MonitorMode::Disabled,
            incompatible: Some(Incompatibility::NetworkFilesystem),
            ..MonitorSettings::default()
        };

        run_refresh(&settings, &mut state, &mut index, &mut oracle);
        assert!(state.warned_incompatible);
        run_refresh(&settings, &mut state, &mut index, &mut oracle);
        assert!(state.warned_incompatible);
    }
}
