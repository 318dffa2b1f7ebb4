//! Weekly quota and place weighting.
//!
//! [`History`] is rebuilt from a room's rolls and boosts on every roll,
//! boost and listing. Calendar days and ISO weeks are evaluated in the
//! fixed offset configured in [`Rules`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, FixedOffset, IsoWeek, NaiveDate, Offset, Utc};

use crate::domain::{Boost, PlaceId, Roll, UserId};
use crate::error::LunchError;

/// Quota and weighting rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Rules {
    /// Points every user gets per ISO week.
    pub weekly_points: i64,
    /// Factor applied to a place's weight once per active boost.
    pub boost_multiplier: f64,
    /// Offset used to decide which day and week an instant falls in.
    pub utc_offset: FixedOffset,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            weekly_points: 1,
            boost_multiplier: 5.0,
            utc_offset: Utc.fix(),
        }
    }
}

impl Rules {
    /// Rejects rules that would make every boosted weight unusable.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Config`] if `weekly_points` is negative or
    /// `boost_multiplier` is not a finite number above zero.
    pub fn validate(&self) -> Result<(), LunchError> {
        if self.weekly_points < 0 {
            return Err(LunchError::Config(format!(
                "WEEKLY_POINTS must not be negative: {}",
                self.weekly_points
            )));
        }
        if !self.boost_multiplier.is_finite() || self.boost_multiplier <= 0.0 {
            return Err(LunchError::Config(format!(
                "BOOST_MULTIPLIER must be a finite number above zero: {}",
                self.boost_multiplier
            )));
        }
        Ok(())
    }
}

/// What a room's rolls and boosts imply at one instant.
#[derive(Debug, Clone)]
pub struct History {
    rules: Rules,
    /// Rolls of the current week bucketed by calendar day, oldest first.
    this_week_rolls: BTreeMap<NaiveDate, Vec<Roll>>,
    this_week_boosts: Vec<Boost>,
    /// Most recent roll per place, over all time.
    last_rolled: HashMap<PlaceId, DateTime<Utc>>,
    latest_roll: Option<DateTime<Utc>>,
    active_boosts: HashMap<PlaceId, Vec<Boost>>,
}

impl History {
    /// Builds the history of one room as seen at `now`.
    #[must_use]
    pub fn build(rolls: &[Roll], boosts: &[Boost], now: DateTime<Utc>, rules: &Rules) -> Self {
        let week = iso_week(now, rules);

        let mut this_week_rolls: BTreeMap<NaiveDate, Vec<Roll>> = BTreeMap::new();
        let mut last_rolled: HashMap<PlaceId, DateTime<Utc>> = HashMap::new();
        let mut latest_roll: Option<DateTime<Utc>> = None;
        for roll in rolls {
            if iso_week(roll.time, rules) == week {
                this_week_rolls
                    .entry(local_day(roll.time, rules))
                    .or_default()
                    .push(roll.clone());
            }
            last_rolled
                .entry(roll.place_id)
                .and_modify(|last| *last = (*last).max(roll.time))
                .or_insert(roll.time);
            if latest_roll.is_none_or(|latest| roll.time > latest) {
                latest_roll = Some(roll.time);
            }
        }
        for bucket in this_week_rolls.values_mut() {
            bucket.sort_by_key(|roll| roll.time);
        }

        let mut this_week_boosts = Vec::new();
        let mut active_boosts: HashMap<PlaceId, Vec<Boost>> = HashMap::new();
        for boost in boosts {
            if iso_week(boost.time, rules) == week {
                this_week_boosts.push(boost.clone());
            }
            // A boost lasts until the next roll of its room.
            if latest_roll.is_none_or(|latest| latest < boost.time) {
                active_boosts
                    .entry(boost.place_id)
                    .or_default()
                    .push(boost.clone());
            }
        }

        Self {
            rules: rules.clone(),
            this_week_rolls,
            this_week_boosts,
            last_rolled,
            latest_roll,
            active_boosts,
        }
    }

    /// Points `user_id` has left this week.
    ///
    /// Every boost costs a point, and so does every roll beyond the first of
    /// its day. The result may be negative.
    #[must_use]
    pub fn points_left(&self, user_id: &UserId) -> i64 {
        let boosts = self
            .this_week_boosts
            .iter()
            .filter(|boost| &boost.user_id == user_id)
            .count();
        let rerolls = self
            .this_week_rolls
            .values()
            .flat_map(|bucket| bucket.iter().skip(1))
            .filter(|roll| &roll.user_id == user_id)
            .count();
        let spent = i64::try_from(boosts.saturating_add(rerolls)).unwrap_or(i64::MAX);
        self.rules.weekly_points.saturating_sub(spent)
    }

    /// Checks whether `user_id` may roll at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NoPoints`] if the room already rolled today and
    /// the user has no points left.
    pub fn can_roll(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<(), LunchError> {
        let today = local_day(now, &self.rules);
        let first_roll_today = self
            .this_week_rolls
            .get(&today)
            .is_none_or(Vec::is_empty);
        if first_roll_today || self.points_left(user_id) > 0 {
            Ok(())
        } else {
            Err(LunchError::NoPoints)
        }
    }

    /// Checks whether `user_id` may boost.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NoPoints`] if the user has no points left.
    pub fn can_boost(&self, user_id: &UserId) -> Result<(), LunchError> {
        if self.points_left(user_id) > 0 {
            Ok(())
        } else {
            Err(LunchError::NoPoints)
        }
    }

    /// Boosts on `place_id` created after the latest roll.
    #[must_use]
    pub fn active_boosts(&self, place_id: &PlaceId) -> &[Boost] {
        self.active_boosts
            .get(place_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// When `place_id` was last rolled, if ever.
    #[must_use]
    pub fn last_rolled(&self, place_id: &PlaceId) -> Option<DateTime<Utc>> {
        self.last_rolled.get(place_id).copied()
    }

    /// Time of the most recent roll in the room.
    #[must_use]
    pub fn latest_roll(&self) -> Option<DateTime<Utc>> {
        self.latest_roll
    }

    /// Lottery weight of every place in `places`.
    ///
    /// A place never rolled weighs the number of places. A place rolled `d`
    /// whole days ago weighs `d + 1`, capped at the number of places. Each
    /// active boost then multiplies the weight.
    #[must_use]
    pub fn weights(&self, places: &[PlaceId], now: DateTime<Utc>) -> BTreeMap<PlaceId, f64> {
        let total = places.len();
        let ceiling = count_as_weight(total);
        places
            .iter()
            .map(|place_id| {
                let mut weight = match self.last_rolled(place_id) {
                    None => ceiling,
                    Some(rolled_at) => {
                        // Clock skew can put the last roll in the future.
                        let hours = now.signed_duration_since(rolled_at).num_hours().max(0);
                        let days = usize::try_from(hours / 24).unwrap_or(usize::MAX);
                        if days >= total {
                            ceiling
                        } else {
                            count_as_weight(days.saturating_add(1))
                        }
                    }
                };
                for _ in self.active_boosts(place_id) {
                    weight *= self.rules.boost_multiplier;
                }
                (*place_id, weight)
            })
            .collect()
    }
}

fn count_as_weight(count: usize) -> f64 {
    u32::try_from(count).map_or(f64::from(u32::MAX), f64::from)
}

fn iso_week(time: DateTime<Utc>, rules: &Rules) -> IsoWeek {
    time.with_timezone(&rules.utc_offset).iso_week()
}

fn local_day(time: DateTime<Utc>, rules: &Rules) -> NaiveDate {
    time.with_timezone(&rules.utc_offset).date_naive()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::{EventId, RoomId};
    use crate::projection::fixtures::{at, monday};

    fn roll(user: &str, place: PlaceId, time: DateTime<Utc>) -> Roll {
        Roll {
            id: EventId::new(),
            user_id: UserId::from(user),
            place_id: place,
            room_id: RoomId::default(),
            time,
        }
    }

    fn boost(user: &str, place: PlaceId, time: DateTime<Utc>) -> Boost {
        Boost {
            id: EventId::new(),
            user_id: UserId::from(user),
            place_id: place,
            room_id: RoomId::default(),
            time,
        }
    }

    fn history(rolls: &[Roll], boosts: &[Boost], now: DateTime<Utc>) -> History {
        History::build(rolls, boosts, now, &Rules::default())
    }

    #[test]
    fn rules_reject_unusable_quota_settings() {
        assert!(Rules::default().validate().is_ok());
        let free = Rules {
            weekly_points: 0,
            ..Rules::default()
        };
        assert!(free.validate().is_ok());

        for multiplier in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let rules = Rules {
                boost_multiplier: multiplier,
                ..Rules::default()
            };
            assert!(matches!(rules.validate(), Err(LunchError::Config(_))));
        }
        let negative = Rules {
            weekly_points: -1,
            ..Rules::default()
        };
        assert!(matches!(negative.validate(), Err(LunchError::Config(_))));
    }

    #[test]
    fn first_roll_of_the_day_is_free() {
        let u1 = UserId::from("u1");
        let place = PlaceId::new();
        // u1 spent their point on a boost already.
        let h = history(&[], &[boost("u1", place, at(0))], at(1));
        assert_eq!(h.points_left(&u1), 0);
        assert!(h.can_roll(&u1, at(1)).is_ok());
        assert!(matches!(h.can_boost(&u1), Err(LunchError::NoPoints)));
    }

    #[test]
    fn reroll_costs_the_weekly_point() {
        let u1 = UserId::from("u1");
        let place = PlaceId::new();
        let rolls = [roll("u1", place, at(0)), roll("u1", place, at(1))];

        let h = history(&rolls, &[], at(2));
        assert_eq!(h.points_left(&u1), 0);
        assert!(matches!(h.can_roll(&u1, at(2)), Err(LunchError::NoPoints)));
        assert!(matches!(h.can_boost(&u1), Err(LunchError::NoPoints)));
        assert_eq!(h.points_left(&UserId::from("u2")), 1);

        let next_week = at(0) + Duration::days(7);
        let later = history(&rolls, &[], next_week);
        assert_eq!(later.points_left(&u1), 1);
        assert!(later.can_boost(&u1).is_ok());
    }

    #[test]
    fn only_the_rerolling_user_pays() {
        let place = PlaceId::new();
        let rolls = [roll("u1", place, at(0)), roll("u2", place, at(1))];
        let h = history(&rolls, &[], at(2));
        assert_eq!(h.points_left(&UserId::from("u1")), 1);
        assert_eq!(h.points_left(&UserId::from("u2")), 0);
    }

    #[test]
    fn first_roll_is_free_on_each_day() {
        let u1 = UserId::from("u1");
        let place = PlaceId::new();
        let tuesday = at(0) + Duration::days(1);
        let rolls = [roll("u1", place, at(0)), roll("u1", place, tuesday)];
        let h = history(&rolls, &[], tuesday + Duration::minutes(1));
        assert_eq!(h.points_left(&u1), 1);
    }

    #[test]
    fn points_never_exceed_the_weekly_budget() {
        let u1 = UserId::from("u1");
        let place = PlaceId::new();
        let mut rolls = Vec::new();
        let mut boosts = Vec::new();
        for minute in 0..6 {
            if minute % 2 == 0 {
                rolls.push(roll("u1", place, at(minute)));
            } else {
                boosts.push(boost("u1", place, at(minute)));
            }
            let left = history(&rolls, &boosts, at(minute)).points_left(&u1);
            assert!(left <= 1);
        }
        assert!(history(&rolls, &boosts, at(10)).points_left(&u1) < 0);
    }

    #[test]
    fn boost_before_roll_is_spent() {
        let a = PlaceId::new();
        let b = PlaceId::new();
        let h = history(&[roll("u2", b, at(1))], &[boost("u1", a, at(0))], at(2));
        assert!(h.active_boosts(&a).is_empty());
    }

    #[test]
    fn boost_after_roll_stays_active() {
        let a = PlaceId::new();
        let h = history(&[roll("u2", a, at(0))], &[boost("u1", a, at(1))], at(2));
        assert_eq!(h.active_boosts(&a).len(), 1);
        assert_eq!(h.latest_roll(), Some(at(0)));
    }

    #[test]
    fn boosts_are_active_before_any_roll() {
        let a = PlaceId::new();
        let h = history(&[], &[boost("u1", a, at(0)), boost("u2", a, at(1))], at(2));
        assert_eq!(h.active_boosts(&a).len(), 2);
    }

    #[test]
    fn fresh_places_weigh_the_place_count() {
        let places = [PlaceId::new(), PlaceId::new(), PlaceId::new()];
        let weights = history(&[], &[], at(0)).weights(&places, at(0));
        assert_eq!(weights.len(), 3);
        assert!(weights.values().all(|w| (*w - 3.0).abs() < f64::EPSILON));
    }

    #[test]
    fn weight_grows_with_days_since_last_roll() {
        let places: Vec<PlaceId> = (0..4).map(|_| PlaceId::new()).collect();
        let Some(&recent) = places.first() else {
            panic!("no places");
        };
        let Some(&older) = places.get(1) else {
            panic!("no places");
        };
        let Some(&ancient) = places.get(2) else {
            panic!("no places");
        };
        let now = at(0) + Duration::days(20);
        let rolls = [
            roll("u1", recent, now - Duration::hours(5)),
            roll("u1", older, now - Duration::hours(49)),
            roll("u1", ancient, now - Duration::days(10)),
        ];
        let weights = history(&rolls, &[], now).weights(&places, now);
        assert_eq!(weights.get(&recent).copied(), Some(1.0));
        assert_eq!(weights.get(&older).copied(), Some(3.0));
        assert_eq!(weights.get(&ancient).copied(), Some(4.0));
    }

    #[test]
    fn each_active_boost_multiplies_the_weight() {
        let a = PlaceId::new();
        let b = PlaceId::new();
        let boosts = [boost("u1", a, at(0)), boost("u2", a, at(1)), boost("u3", b, at(2))];
        let weights = history(&[], &boosts, at(3)).weights(&[a, b], at(3));
        assert_eq!(weights.get(&a).copied(), Some(2.0 * 25.0));
        assert_eq!(weights.get(&b).copied(), Some(2.0 * 5.0));
        assert!(weights.get(&a) > weights.get(&b));
    }

    #[test]
    fn weeks_follow_the_configured_offset() {
        let Some(plus_three) = FixedOffset::east_opt(3 * 3600) else {
            panic!("offset out of range");
        };
        let rules = Rules {
            utc_offset: plus_three,
            ..Rules::default()
        };
        // Sunday 22:00 UTC is already Monday in UTC+3.
        let Some(sunday_late) = Utc.with_ymd_and_hms(2021, 9, 12, 22, 0, 0).single() else {
            panic!("invalid timestamp");
        };
        let u1 = UserId::from("u1");
        let boosts = [boost("u1", PlaceId::new(), monday())];

        let in_utc = History::build(&[], &boosts, sunday_late, &Rules::default());
        assert_eq!(in_utc.points_left(&u1), 0);
        let shifted = History::build(&[], &boosts, sunday_late, &rules);
        assert_eq!(shifted.points_left(&u1), 1);
    }
}
