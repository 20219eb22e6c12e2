use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use clap::{Subcommand, ValueEnum};
use petcare_core::{
    JsonDirMirror, ReschedulePolicy, ScheduleItem, ScheduleKind, ScheduleStore,
    overdue_perform_time, parse_local_to_utc, parse_timezone, to_local_minute,
};
use petcare_sync::{HttpRemote, HttpRemoteConfig, NewSchedule, RemoteSync, SyncError, SyncOptions};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::auth::resolve_token;
use crate::config::{Config, load_config};
use crate::state::cache_dir;

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Show the cached list for a pet (no network)
    List {
        #[arg(long)]
        pet: String,
    },

    /// Replace the cached list for a pet with the server's
    Refresh {
        #[arg(long)]
        pet: String,
    },

    /// Create a definition and assign it to one or more pets
    Create {
        #[arg(long)]
        name: String,

        /// First occurrence, "YYYY-MM-DD HH:MM" in the configured timezone
        #[arg(long)]
        start: String,

        /// Interval amount, e.g. 2
        #[arg(long)]
        every: String,

        /// Interval unit: hour(s), day(s), week(s), month(s)
        #[arg(long)]
        unit: String,

        /// Pet to assign (repeatable)
        #[arg(long = "pet", required = true)]
        pets: Vec<String>,

        #[arg(long)]
        owner: Option<String>,
    },

    /// Record that a routine was done / a dose was given
    Perform {
        /// Routine or medication id
        #[arg(long)]
        entity: String,

        #[arg(long)]
        pet: String,

        /// When it was performed, "YYYY-MM-DD HH:MM" (default: now)
        #[arg(long, conflicts_with = "overdue")]
        at: Option<String>,

        /// Catch up an overdue item, choosing how the next time is derived
        #[arg(long, value_enum)]
        overdue: Option<OverduePolicy>,
    },

    /// Delete a definition and every assignment of it
    Delete {
        #[arg(long)]
        entity: String,
    },

    /// Items due now, or within the next N hours (cached, no network)
    Due {
        #[arg(long)]
        pet: String,

        #[arg(long, default_value_t = 0)]
        within_hours: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverduePolicy {
    /// Next due is one interval after now
    FromNow,
    /// Keep the original cadence
    FromOriginal,
}

impl From<OverduePolicy> for ReschedulePolicy {
    fn from(p: OverduePolicy) -> Self {
        match p {
            OverduePolicy::FromNow => ReschedulePolicy::FromNow,
            OverduePolicy::FromOriginal => ReschedulePolicy::FromOriginal,
        }
    }
}

struct Session {
    sync: RemoteSync,
    tz: Tz,
}

fn open_session(kind: ScheduleKind, cfg: &Config) -> Result<Session> {
    let tz = parse_timezone(&cfg.schedule.timezone)
        .with_context(|| format!("schedule.timezone = {:?}", cfg.schedule.timezone))?;

    let mirror = Arc::new(JsonDirMirror::new(cache_dir()?));
    let store = ScheduleStore::open(kind, mirror).context("open schedule cache")?;

    let mut http = HttpRemoteConfig::new(cfg.remote.base_url.clone()).with_timeout(cfg.remote.timeout());
    if let Some(token) = resolve_token()? {
        http = http.with_token(token);
    }

    let options = SyncOptions::default()
        .with_timezone(tz)
        .with_optimistic(cfg.schedule.optimistic);
    tracing::debug!(
        %kind,
        %tz,
        base_url = %cfg.remote.base_url,
        optimistic = cfg.schedule.optimistic,
        "session opened"
    );
    let sync = RemoteSync::new(Arc::new(store), Arc::new(HttpRemote::new(http)), options);
    Ok(Session { sync, tz })
}

/// Attach a next step to errors the user can fix.
fn explain(e: SyncError) -> anyhow::Error {
    let hint = match &e {
        SyncError::Unauthorized { .. } => Some("not signed in; run `petcare auth set-token`"),
        SyncError::RemoteUnavailable { status: None, .. } => {
            Some("server unreachable; check remote.base_url (`petcare config show`)")
        }
        _ => None,
    };
    match hint {
        Some(h) => anyhow::Error::new(e).context(h),
        None => e.into(),
    }
}

pub fn format_item(item: &ScheduleItem, tz: Tz, now: DateTime<Utc>) -> String {
    let label = item.name.as_deref().unwrap_or(item.entity_id.as_str());
    let last = item
        .last_performed_time
        .map(|t| to_local_minute(t, tz))
        .unwrap_or_else(|| "never".to_string());
    let mut flags = String::new();
    if item.is_overdue(now) {
        flags.push_str(" OVERDUE");
    }
    if item.provisional {
        flags.push_str(" (pending)");
    }
    format!(
        "{}  {}  {}  last={}  [{} / {}]{}",
        to_local_minute(item.next_due_time, tz),
        label,
        item.interval,
        last,
        item.entity_id,
        item.assignment_id,
        flags
    )
}

fn print_items(items: &[ScheduleItem], tz: Tz, now: DateTime<Utc>) {
    if items.is_empty() {
        println!("(none)");
        return;
    }
    for item in items {
        println!("{}", format_item(item, tz, now));
    }
}

pub async fn run(kind: ScheduleKind, command: ScheduleCommand) -> Result<()> {
    let cfg = load_config()?;
    let Session { sync, tz } = open_session(kind, &cfg)?;
    let now = Utc::now();

    match command {
        ScheduleCommand::List { pet } => {
            print_items(&sync.store().get(&pet)?, tz, now);
        }

        ScheduleCommand::Refresh { pet } => {
            let items = sync.refresh(&pet).await.map_err(explain)?;
            println!("Refreshed {} {} for {}", items.len(), kind.collection(), pet);
            print_items(&items, tz, now);
        }

        ScheduleCommand::Create {
            name,
            start,
            every,
            unit,
            pets,
            owner,
        } => {
            let mut schedule = NewSchedule::parse(&name, &start, &every, &unit, tz).map_err(explain)?;
            if let Some(owner) = owner {
                schedule = schedule.with_owner(owner);
            }
            let pets: BTreeSet<String> = pets.into_iter().collect();
            let items = sync.create_and_assign(schedule, &pets).await.map_err(explain)?;
            println!("Created {} assignment(s)", items.len());
            print_items(&items, tz, now);
        }

        ScheduleCommand::Perform {
            entity,
            pet,
            at,
            overdue,
        } => {
            let outcome = match overdue {
                Some(policy) => {
                    let item = find_assigned(&sync, &entity, &pet).await?;
                    let policy = ReschedulePolicy::from(policy);
                    let (_, lands_on) = overdue_perform_time(item.next_due_time, item.interval, now, policy);
                    println!("Rescheduling toward {}", to_local_minute(lands_on, tz));
                    sync.perform_overdue(&item, policy, now).await.map_err(explain)?
                }
                None => {
                    let performed_at = match at {
                        Some(raw) => parse_local_to_utc(&raw, tz)?,
                        None => now,
                    };
                    sync.perform(&entity, &pet, performed_at).await.map_err(explain)?
                }
            };

            if let Some(next) = outcome.next_due {
                println!("Next due: {}", to_local_minute(next, tz));
            }
            if !outcome.refreshed {
                println!("Recorded, but the refresh failed; run `refresh --pet {pet}` later.");
            }
        }

        ScheduleCommand::Delete { entity } => {
            let removed = sync.delete(&entity).await.map_err(explain)?;
            println!("Deleted {} ({} cached assignment(s) removed)", entity, removed.len());
        }

        ScheduleCommand::Due { pet, within_hours } => {
            if within_hours < 0 {
                bail!("--within-hours must not be negative");
            }
            let cutoff = now + Duration::hours(within_hours);
            print_items(&sync.store().due_before(&pet, cutoff)?, tz, now);
        }
    }

    Ok(())
}

/// Cached assignment of `entity` for `pet`, refreshing once if it is not cached.
async fn find_assigned(sync: &RemoteSync, entity: &str, pet: &str) -> Result<ScheduleItem> {
    let cached = sync.store().get(pet)?;
    let items = if cached.iter().any(|i| i.entity_id == entity) {
        cached
    } else {
        sync.refresh(pet).await.map_err(explain)?
    };
    items
        .into_iter()
        .find(|i| i.entity_id == entity)
        .with_context(|| format!("{entity} is not assigned to {pet}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use petcare_core::Interval;

    #[test]
    fn item_line_shows_local_times_and_flags() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let item = ScheduleItem::scheduled("a-1", "r1", "p1", "u1", Interval::days(2).unwrap(), start, now)
            .with_name("Walk")
            .provisional();

        let line = format_item(&item, chrono_tz::America::Chicago, now);

        assert!(line.starts_with("2024-01-05 10:00  Walk  every 2 days"), "{line}");
        assert!(line.contains("last=2024-01-01 10:00"), "{line}");
        assert!(line.ends_with("(pending)"), "{line}");
        assert!(!line.contains("OVERDUE"));
    }

    #[test]
    fn overdue_items_are_flagged() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut item = ScheduleItem::scheduled(
            "a-1",
            "r1",
            "p1",
            "u1",
            Interval::days(1).unwrap(),
            start,
            start,
        );
        item.next_due_time = start;

        let line = format_item(&item, chrono_tz::UTC, start + Duration::hours(3));

        assert!(line.contains("OVERDUE"), "{line}");
        assert!(line.contains("  r1  "), "{line}");
    }

    #[test]
    fn policy_flag_maps_to_core_policy() {
        assert_eq!(ReschedulePolicy::from(OverduePolicy::FromNow), ReschedulePolicy::FromNow);
        assert_eq!(
            ReschedulePolicy::from(OverduePolicy::FromOriginal),
            ReschedulePolicy::FromOriginal
        );
    }
}
