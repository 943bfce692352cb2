use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::{dimmer::Dimmer, ports::PropertyNotifier, types::Property};

/// Work done once per period: on-time sampling, the local midnight reset and
/// the initial property broadcast.
#[derive(Debug, Clone, Default)]
pub struct PeriodicTask {
    initial_delivered: bool,
    last_date: Option<NaiveDate>,
}

impl PeriodicTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one period. `today` is the calendar date of `now` in the fixture's
    /// local timezone.
    pub fn tick(
        &mut self,
        dimmer: &Dimmer,
        now: DateTime<Utc>,
        today: NaiveDate,
        notifier: &dyn PropertyNotifier,
    ) {
        if dimmer.sample_on_time(now) {
            notify(dimmer, notifier, Property::DailyOnMinutes);
        }

        if dimmer.is_clock_plausible(now) {
            match self.last_date {
                Some(date) if date != today => {
                    info!("new day {today}, resetting on-time");
                    if dimmer.reset_daily_on_time(now) {
                        notify(dimmer, notifier, Property::DailyOnMinutes);
                    }
                }
                _ => {}
            }
            self.last_date = Some(today);
        }

        if !self.initial_delivered {
            let delivered = Property::ALL
                .into_iter()
                .filter(|property| notify(dimmer, notifier, *property))
                .count();
            self.initial_delivered = delivered == Property::ALL.len();
            if self.initial_delivered {
                info!("initial property values delivered");
            } else {
                debug!(
                    "initial delivery incomplete ({delivered}/{})",
                    Property::ALL.len()
                );
            }
        }
    }
}

fn notify(dimmer: &Dimmer, notifier: &dyn PropertyNotifier, property: Property) -> bool {
    notifier.notify(property, dimmer.property_value(property))
}
