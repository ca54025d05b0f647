//! The discrete-time scheduler: a monthly loop with tick, resolve, and
//! tock phases, a calendar date, and the global decay driver.

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info};

use persistence::MarketActivityRow;
use sim_core::{CoreError, Result};

use std::collections::BTreeMap;

use crate::arena::AgentId;
use crate::context::Context;

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| CoreError::value(format!("invalid calendar date {year}-{month}-{day}")))
}

/// Scheduler state. Owned by the [`Context`]; the loop itself runs in
/// [`Context::run_sim`] so phases can dispatch agent behaviors.
pub struct Timer {
    time: i32,
    time0: i32,
    duration: i32,
    decay_interval: i32,
    month0: u32,
    year0: i32,
    start_date: NaiveDate,
    date: NaiveDate,
    handle: String,
    tick_listeners: Vec<AgentId>,
    resolve_listeners: Vec<AgentId>,
    pending_tick: Vec<AgentId>,
    pending_resolve: Vec<AgentId>,
    in_phase: bool,
    offer_qtys: BTreeMap<(String, i32), f64>,
    request_qtys: BTreeMap<(String, i32), f64>,
}

impl Timer {
    pub(crate) fn new() -> Timer {
        let epoch = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or(NaiveDate::MIN);
        Timer {
            time: 0,
            time0: 0,
            duration: 0,
            decay_interval: 0,
            month0: 1,
            year0: 2010,
            start_date: epoch,
            date: epoch,
            handle: String::new(),
            tick_listeners: Vec::new(),
            resolve_listeners: Vec::new(),
            pending_tick: Vec::new(),
            pending_resolve: Vec::new(),
            in_phase: false,
            offer_qtys: BTreeMap::new(),
            request_qtys: BTreeMap::new(),
        }
    }

    /// Validates and applies the simulation's timing parameters.
    pub fn initialize(
        &mut self,
        duration: i32,
        start_month: u32,
        start_year: i32,
        sim_start: i32,
        decay: i32,
        handle: &str,
    ) -> Result<()> {
        if !(1..=12).contains(&start_month) {
            return Err(CoreError::value(format!(
                "invalid start month {start_month}; must be between 1 and 12"
            )));
        }
        if start_year < 1942 {
            return Err(CoreError::value(format!(
                "invalid start year {start_year}; the first man-made reactor was built in 1942"
            )));
        }
        if start_year > 2063 {
            return Err(CoreError::value(format!(
                "invalid start year {start_year}; outside the supported horizon"
            )));
        }
        if duration < 1 {
            return Err(CoreError::value(format!(
                "invalid duration {duration}; must be at least one month"
            )));
        }
        if decay > duration {
            return Err(CoreError::value(format!(
                "invalid decay interval {decay}; no decay occurs past the duration, use -1 to disable"
            )));
        }
        self.time0 = sim_start;
        self.time = sim_start;
        self.duration = duration;
        self.decay_interval = decay;
        self.month0 = start_month;
        self.year0 = start_year;
        self.handle = handle.to_string();
        self.start_date = ymd(start_year, start_month, 1)?;
        self.date = self.start_date;
        Ok(())
    }

    pub fn time(&self) -> i32 {
        self.time
    }

    pub fn start_time(&self) -> i32 {
        self.time0
    }

    pub fn duration(&self) -> i32 {
        self.duration
    }

    pub fn final_time(&self) -> i32 {
        self.time0 + self.duration
    }

    pub fn decay_interval(&self) -> i32 {
        self.decay_interval
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Calendar date of the current month's first day.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Month and year corresponding to a simulation time step.
    pub fn convert_time(&self, time: i32) -> (u32, i32) {
        let months = (time - self.time0) + self.month0 as i32 - 1;
        let month = months.rem_euclid(12) as u32 + 1;
        let year = self.year0 + months.div_euclid(12);
        (month, year)
    }

    /// Simulation time step for a month and year.
    pub fn convert_date(&self, month: u32, year: i32) -> i32 {
        (year - self.year0) * 12 + month as i32 - self.month0 as i32 + self.time0
    }

    pub(crate) fn days_in_month(&self) -> Result<u32> {
        let (y, m) = (self.date.year(), self.date.month());
        let next = if m == 12 {
            ymd(y + 1, 1, 1)?
        } else {
            ymd(y, m + 1, 1)?
        };
        Ok(next.signed_duration_since(self.date).num_days() as u32)
    }

    pub(crate) fn advance_month(&mut self) -> Result<()> {
        let (y, m) = (self.date.year(), self.date.month());
        self.date = if m == 12 {
            ymd(y + 1, 1, 1)?
        } else {
            ymd(y, m + 1, 1)?
        };
        self.time += 1;
        Ok(())
    }

    // ---- listener registry ----

    /// Registers a time agent for tick/tock/daily notifications.
    /// Re-registration is a no-op; registration during a phase is deferred
    /// to the next month.
    pub fn register_tick_listener(&mut self, id: AgentId) {
        if self.tick_listeners.contains(&id) || self.pending_tick.contains(&id) {
            return;
        }
        if self.in_phase {
            debug!(agent = %id, "deferring tick registration to next month");
            self.pending_tick.push(id);
        } else {
            self.tick_listeners.push(id);
        }
    }

    /// Registers a market for resolve notifications.
    pub fn register_resolve_listener(&mut self, id: AgentId) {
        if self.resolve_listeners.contains(&id) || self.pending_resolve.contains(&id) {
            return;
        }
        if self.in_phase {
            debug!(agent = %id, "deferring resolve registration to next month");
            self.pending_resolve.push(id);
        } else {
            self.resolve_listeners.push(id);
        }
    }

    /// Removes an agent from every listener list, by identity.
    pub fn deregister(&mut self, id: AgentId) {
        self.tick_listeners.retain(|&x| x != id);
        self.resolve_listeners.retain(|&x| x != id);
        self.pending_tick.retain(|&x| x != id);
        self.pending_resolve.retain(|&x| x != id);
    }

    pub(crate) fn merge_pending(&mut self) {
        self.tick_listeners.append(&mut self.pending_tick);
        self.resolve_listeners.append(&mut self.pending_resolve);
    }

    pub(crate) fn set_in_phase(&mut self, in_phase: bool) {
        self.in_phase = in_phase;
    }

    pub(crate) fn tick_snapshot(&self) -> Vec<AgentId> {
        self.tick_listeners.clone()
    }

    pub(crate) fn resolve_snapshot(&self) -> Vec<AgentId> {
        self.resolve_listeners.clone()
    }

    pub(crate) fn is_tick_listener(&self, id: AgentId) -> bool {
        self.tick_listeners.contains(&id)
    }

    pub(crate) fn is_resolve_listener(&self, id: AgentId) -> bool {
        self.resolve_listeners.contains(&id)
    }

    // ---- supply/demand diagnostics ----

    pub fn tally_offer(&mut self, commodity: &str, time: i32, qty: f64) {
        *self
            .offer_qtys
            .entry((commodity.to_string(), time))
            .or_insert(0.0) += qty;
    }

    pub fn tally_request(&mut self, commodity: &str, time: i32, qty: f64) {
        *self
            .request_qtys
            .entry((commodity.to_string(), time))
            .or_insert(0.0) += qty;
    }

    /// Requested minus offered quantity for a commodity at a time step.
    pub fn unmet_demand(&self, commodity: &str, time: i32) -> f64 {
        let key = (commodity.to_string(), time);
        let supply = self.offer_qtys.get(&key).copied().unwrap_or(0.0);
        let demand = self.request_qtys.get(&key).copied().unwrap_or(0.0);
        demand - supply
    }

    /// The full diagnostic table, for export.
    pub fn market_activity(&self) -> Vec<MarketActivityRow> {
        let mut keys: Vec<&(String, i32)> = self.offer_qtys.keys().collect();
        for k in self.request_qtys.keys() {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        keys.sort();
        keys.into_iter()
            .map(|k| MarketActivityRow {
                commodity: k.0.clone(),
                time: k.1,
                offered: self.offer_qtys.get(k).copied().unwrap_or(0.0),
                requested: self.request_qtys.get(k).copied().unwrap_or(0.0),
            })
            .collect()
    }
}

impl Context {
    /// Advances the simulation by one month: global decay when due, ticks,
    /// market resolves, the daily loop with the final tock, then the date
    /// advance. Within each phase listeners are visited in the
    /// registration order captured at the start of the phase; listeners
    /// removed mid-phase are skipped, and insertions wait until the next
    /// month. Errors from listeners are fatal and surface to the caller.
    pub fn step(&mut self) -> Result<()> {
        if self.timer.duration() < 1 {
            return Err(CoreError::state("timer is not initialized"));
        }
        if self.timer.time() >= self.timer.final_time() {
            return Err(CoreError::state("simulation duration already elapsed"));
        }
        let t = self.timer.time();
        debug!(time = t, date = %self.timer.date(), "stepping month");
        self.timer.merge_pending();

        let decay = self.timer.decay_interval();
        if decay > 0 && t > 0 && t % decay == 0 {
            info!(time = t, "triggering global material decay");
            for id in self.timer.tick_snapshot() {
                if self.timer.is_tick_listener(id) && self.arena.contains(id) {
                    self.with_model(id, |m, ctx, aid| m.decay_inventory(ctx, aid, t))?;
                }
            }
        }

        self.timer.set_in_phase(true);

        for id in self.timer.tick_snapshot() {
            if self.timer.is_tick_listener(id) && self.arena.contains(id) {
                self.with_model(id, |m, ctx, aid| m.tick(ctx, aid, t))?;
            }
        }

        for id in self.timer.resolve_snapshot() {
            if self.timer.is_resolve_listener(id) && self.arena.contains(id) {
                self.with_model(id, |m, ctx, aid| m.resolve(ctx, aid))?;
            }
        }

        let last_day = self.timer.days_in_month()?;
        for day in 1..=last_day {
            for id in self.timer.tick_snapshot() {
                if self.timer.is_tick_listener(id) && self.arena.contains(id) {
                    self.with_model(id, |m, ctx, aid| m.daily_tasks(ctx, aid, t, day))?;
                }
            }
            if day == last_day {
                for id in self.timer.tick_snapshot() {
                    if self.timer.is_tick_listener(id) && self.arena.contains(id) {
                        self.with_model(id, |m, ctx, aid| m.tock(ctx, aid, t))?;
                    }
                }
            }
        }

        self.timer.set_in_phase(false);
        self.timer.advance_month()
    }

    /// Runs the simulation to the end of its duration, then disposes of
    /// the remaining agents and flushes the sink.
    pub fn run_sim(&mut self) -> Result<()> {
        let t0 = self.timer.start_time();
        let duration = self.timer.duration();
        if duration < 1 {
            return Err(CoreError::state("timer is not initialized"));
        }
        info!(start = t0, duration, "beginning simulation");
        while self.timer.time() < t0 + duration {
            self.step()?;
        }
        info!("simulation complete; disposing remaining agents");
        self.dispose_remaining()?;
        self.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> Timer {
        let mut t = Timer::new();
        t.initialize(24, 7, 2005, 0, -1, "test").unwrap();
        t
    }

    #[test]
    fn initialize_validates_bounds() {
        let mut t = Timer::new();
        assert!(matches!(
            t.initialize(12, 0, 2005, 0, -1, ""),
            Err(CoreError::Value(_))
        ));
        assert!(matches!(
            t.initialize(12, 13, 2005, 0, -1, ""),
            Err(CoreError::Value(_))
        ));
        assert!(matches!(
            t.initialize(12, 1, 1900, 0, -1, ""),
            Err(CoreError::Value(_))
        ));
        assert!(matches!(
            t.initialize(12, 1, 2100, 0, -1, ""),
            Err(CoreError::Value(_))
        ));
        assert!(matches!(
            t.initialize(12, 1, 2005, 0, 24, ""),
            Err(CoreError::Value(_))
        ));
        assert!(t.initialize(12, 1, 2005, 0, 12, "").is_ok());
    }

    #[test]
    fn date_conversion_roundtrips() {
        let t = timer();
        assert_eq!(t.convert_time(0), (7, 2005));
        assert_eq!(t.convert_time(5), (12, 2005));
        assert_eq!(t.convert_time(6), (1, 2006));
        for time in 0..24 {
            let (m, y) = t.convert_time(time);
            assert_eq!(t.convert_date(m, y), time);
        }
    }

    #[test]
    fn month_advance_walks_the_calendar() {
        let mut t = timer();
        assert_eq!(t.days_in_month().unwrap(), 31); // July
        t.advance_month().unwrap();
        assert_eq!(t.date().month(), 8);
        assert_eq!(t.time(), 1);
        for _ in 0..17 {
            t.advance_month().unwrap();
        }
        assert_eq!(t.time(), 18);
        assert_eq!(t.date().year(), 2007);
    }

    #[test]
    fn leap_february_has_29_days() {
        let mut t = Timer::new();
        t.initialize(12, 2, 2008, 0, -1, "leap").unwrap();
        assert_eq!(t.days_in_month().unwrap(), 29);
    }

    #[test]
    fn unmet_demand_tracks_the_gap() {
        let mut t = timer();
        t.tally_offer("fuel", 0, 100.0);
        t.tally_request("fuel", 0, 130.0);
        t.tally_request("fuel", 0, 20.0);
        assert!((t.unmet_demand("fuel", 0) - 50.0).abs() < 1e-12);
        assert_eq!(t.unmet_demand("fuel", 1), 0.0);

        let rows = t.market_activity();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commodity, "fuel");
        assert_eq!(rows[0].offered, 100.0);
        assert_eq!(rows[0].requested, 150.0);
    }
}
