//! Spot reservation workflow.
//!
//! A spot moves `Free -> Reserved` through [`sign_in`] and back through
//! [`sign_out`] (the holder leaving) or [`reset_layer`] (an admin clearing
//! the layer). [`record_pick`] stamps the layer's pick timer.
//!
//! Sign-in is all-or-nothing: the request is validated in full before any
//! spot changes, and every failure carries the layer's current free list
//! so the requester can be told what is still available.

use std::collections::BTreeSet;
use std::num::IntErrorKind;

use chrono::{DateTime, Utc};
use lotus_types::{Layer, Occupant, Spot, UserId};
use tracing::{debug, info};

use crate::store::LayerLocationMut;

/// Reasons a sign-in request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignInError {
    /// The request named no spots at all.
    #[error("you need to give me at least one spot number")]
    NoSpotsGiven {
        /// Free spot numbers at the time of the request.
        free: Vec<u32>,
    },

    /// A requested spot is not a whole number.
    #[error("`{token}` is not a valid number")]
    InvalidNumber {
        /// The offending argument.
        token: String,
        /// Free spot numbers at the time of the request.
        free: Vec<u32>,
    },

    /// A requested number is not a spot in this layer.
    #[error("there is no spot number {number}")]
    UnknownSpot {
        /// The requested number in decimal form.
        number: String,
        /// Free spot numbers at the time of the request.
        free: Vec<u32>,
    },

    /// A requested spot already has a holder.
    #[error("spot {number} is already taken")]
    AlreadyTaken {
        /// The taken spot.
        number: u32,
        /// Free spot numbers at the time of the request.
        free: Vec<u32>,
    },
}

impl SignInError {
    /// Free spot numbers in the layer when the request was rejected.
    pub fn free_spots(&self) -> &[u32] {
        match self {
            Self::NoSpotsGiven { free }
            | Self::InvalidNumber { free, .. }
            | Self::UnknownSpot { free, .. }
            | Self::AlreadyTaken { free, .. } => free,
        }
    }
}

/// The requester holds no spot in the layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("you do not hold any spot in this layer")]
pub struct NothingHeld {
    /// Free spot numbers at the time of the request.
    pub free: Vec<u32>,
}

/// Successful reservation (or release) details, for confirming to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Zone of the affected layer.
    pub zone: String,
    /// Number of the affected layer.
    pub layer: u32,
    /// Spots that changed, ordered by number, as they are now.
    pub spots: Vec<Spot>,
}

/// Reserve the requested spots for `occupant`.
///
/// `requested` holds the raw command arguments. Duplicates are dropped
/// first, then the request is checked in this order, stopping at the
/// first failure.
///
/// # Errors
///
/// 1. at least one spot was given ([`SignInError::NoSpotsGiven`])
/// 2. every argument is an integer ([`SignInError::InvalidNumber`])
/// 3. every number is a spot of this layer ([`SignInError::UnknownSpot`])
/// 4. every spot is free, including of the requester ([`SignInError::AlreadyTaken`])
///
/// Only when all checks pass are the spots assigned.
pub fn sign_in<S: AsRef<str>>(
    location: LayerLocationMut<'_>,
    requested: &[S],
    occupant: &Occupant,
) -> Result<Confirmation, SignInError> {
    let layer = location.layer;
    let tokens: BTreeSet<&str> = requested.iter().map(|s| s.as_ref().trim()).collect();

    if tokens.is_empty() {
        return Err(SignInError::NoSpotsGiven {
            free: layer.free_spot_numbers(),
        });
    }

    let mut parsed = BTreeSet::new();
    let mut oversized = Vec::new();
    for token in &tokens {
        match token.parse::<i64>() {
            Ok(number) => {
                parsed.insert(number);
            }
            // Still an integer, just wider than any spot number.
            Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
                oversized.push(*token);
            }
            Err(_) => {
                return Err(SignInError::InvalidNumber {
                    token: (*token).to_owned(),
                    free: layer.free_spot_numbers(),
                });
            }
        }
    }

    let mut numbers = BTreeSet::new();
    for &number in &parsed {
        let spot = u32::try_from(number).ok().and_then(|n| layer.spot(n));
        match spot {
            Some(spot) => {
                numbers.insert(spot.number());
            }
            None => {
                return Err(SignInError::UnknownSpot {
                    number: number.to_string(),
                    free: layer.free_spot_numbers(),
                });
            }
        }
    }
    if let Some(token) = oversized.first() {
        return Err(SignInError::UnknownSpot {
            number: (*token).to_owned(),
            free: layer.free_spot_numbers(),
        });
    }

    if let Some(&number) = numbers
        .iter()
        .find(|&&n| layer.spot(n).is_some_and(|s| !s.is_free()))
    {
        return Err(SignInError::AlreadyTaken {
            number,
            free: layer.free_spot_numbers(),
        });
    }

    let mut reserved = Vec::with_capacity(numbers.len());
    for number in numbers {
        if let Some(spot) = layer.spot_mut(number) {
            spot.set_occupant(Some(occupant.clone()));
            reserved.push(spot.clone());
        }
    }

    info!(
        zone = location.zone,
        layer = location.number,
        user = %occupant.user_id(),
        spots = ?reserved.iter().map(Spot::number).collect::<Vec<_>>(),
        "Spots reserved"
    );
    Ok(Confirmation {
        zone: location.zone.to_owned(),
        layer: location.number,
        spots: reserved,
    })
}

/// Release every spot `user` holds in the layer.
///
/// # Errors
///
/// Returns [`NothingHeld`] if the user holds no spot there.
pub fn sign_out(location: LayerLocationMut<'_>, user: UserId) -> Result<Confirmation, NothingHeld> {
    let layer = location.layer;
    let released: Vec<Spot> = layer
        .spots_mut()
        .filter(|spot| spot.is_held_by(user))
        .map(|spot| {
            spot.set_occupant(None);
            spot.clone()
        })
        .collect();

    if released.is_empty() {
        return Err(NothingHeld {
            free: layer.free_spot_numbers(),
        });
    }

    info!(
        zone = location.zone,
        layer = location.number,
        user = %user,
        released = released.len(),
        "Spots released"
    );
    Ok(Confirmation {
        zone: location.zone.to_owned(),
        layer: location.number,
        spots: released,
    })
}

/// Free every spot in the layer, returning how many were held.
pub fn reset_layer(location: LayerLocationMut<'_>) -> usize {
    let cleared = clear_spots(location.layer);
    info!(
        zone = location.zone,
        layer = location.number,
        cleared,
        "Layer reset"
    );
    cleared
}

/// Record that the lotus in the layer was picked at `at`.
pub fn record_pick(location: LayerLocationMut<'_>, at: DateTime<Utc>) {
    location.layer.last_event_time = Some(at);
    debug!(
        zone = location.zone,
        layer = location.number,
        at = %at,
        "Pick recorded"
    );
}

fn clear_spots(layer: &mut Layer) -> usize {
    layer
        .spots_mut()
        .filter_map(|spot| spot.set_occupant(None))
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::{LotusConfig, SpotConfig, ZoneConfig};
    use crate::store::StateStore;

    const CHANNEL: &str = "epl-layer-1";

    fn user(id: u64) -> Occupant {
        Occupant::Stored(UserId::new(id))
    }

    fn two_spot_store() -> StateStore {
        let config = LotusConfig {
            zones: vec![ZoneConfig {
                name: String::from("Eastern-Plaguelands"),
                channel_format: String::from("epl-layer-{}"),
                layers: 1,
                spots: vec![
                    SpotConfig {
                        name: String::from("Cauldron 1"),
                        number: 1,
                    },
                    SpotConfig {
                        name: String::from("Naxx"),
                        number: 2,
                    },
                ],
            }],
            ..LotusConfig::default()
        };
        StateStore::initialize_fresh(&config)
    }

    fn default_store() -> StateStore {
        StateStore::initialize_fresh(&LotusConfig::default())
    }

    fn layer(store: &StateStore) -> &Layer {
        store.find_layer_by_channel_name(CHANNEL).unwrap().layer
    }

    fn try_sign_in(
        store: &mut StateStore,
        requested: &[&str],
        occupant: &Occupant,
    ) -> Result<Confirmation, SignInError> {
        let location = store.find_layer_by_channel_name_mut(CHANNEL).unwrap();
        sign_in(location, requested, occupant)
    }

    #[test]
    fn first_come_gets_the_spot() {
        let mut store = two_spot_store();
        let confirmation = try_sign_in(&mut store, &["1"], &user(100)).unwrap();

        assert_eq!(confirmation.zone, "Eastern-Plaguelands");
        assert_eq!(confirmation.layer, 1);
        assert_eq!(confirmation.spots.len(), 1);
        assert_eq!(confirmation.spots.first().unwrap().name(), "Cauldron 1");

        let layer = layer(&store);
        assert_eq!(layer.spot(1).unwrap().occupant(), Some(&user(100)));
        assert!(layer.spot(2).unwrap().is_free());
    }

    #[test]
    fn taken_spot_is_rejected_and_kept() {
        let mut store = two_spot_store();
        try_sign_in(&mut store, &["1"], &user(100)).unwrap();

        let err = try_sign_in(&mut store, &["1"], &user(200)).unwrap_err();
        assert_eq!(
            err,
            SignInError::AlreadyTaken {
                number: 1,
                free: vec![2]
            }
        );
        assert_eq!(layer(&store).spot(1).unwrap().occupant(), Some(&user(100)));
    }

    #[test]
    fn requester_cannot_take_own_spot_twice() {
        let mut store = two_spot_store();
        try_sign_in(&mut store, &["1"], &user(100)).unwrap();
        let err = try_sign_in(&mut store, &["1"], &user(100)).unwrap_err();
        assert!(matches!(err, SignInError::AlreadyTaken { number: 1, .. }));
    }

    #[test]
    fn unconfigured_number_is_unknown() {
        let mut store = two_spot_store();
        let err = try_sign_in(&mut store, &["9"], &user(100)).unwrap_err();
        assert_eq!(
            err,
            SignInError::UnknownSpot {
                number: String::from("9"),
                free: vec![1, 2]
            }
        );
    }

    #[test]
    fn negative_and_zero_numbers_are_unknown() {
        let mut store = two_spot_store();
        assert!(matches!(
            try_sign_in(&mut store, &["-1"], &user(100)),
            Err(SignInError::UnknownSpot { ref number, .. }) if number == "-1"
        ));
        assert!(matches!(
            try_sign_in(&mut store, &["0"], &user(100)),
            Err(SignInError::UnknownSpot { ref number, .. }) if number == "0"
        ));
    }

    #[test]
    fn oversized_integer_is_unknown_not_invalid() {
        let mut store = two_spot_store();
        let err = try_sign_in(&mut store, &["99999999999999999999"], &user(100)).unwrap_err();
        assert_eq!(
            err,
            SignInError::UnknownSpot {
                number: String::from("99999999999999999999"),
                free: vec![1, 2]
            }
        );
        let err = try_sign_in(&mut store, &["-99999999999999999999"], &user(100)).unwrap_err();
        assert!(matches!(err, SignInError::UnknownSpot { .. }));
        // A malformed token still wins over an oversized one.
        let err = try_sign_in(&mut store, &["99999999999999999999", "x"], &user(100)).unwrap_err();
        assert!(matches!(err, SignInError::InvalidNumber { .. }));
    }

    #[test]
    fn empty_request_is_rejected() {
        let mut store = two_spot_store();
        let err = try_sign_in(&mut store, &[], &user(100)).unwrap_err();
        assert_eq!(err, SignInError::NoSpotsGiven { free: vec![1, 2] });
    }

    #[test]
    fn non_numeric_argument_is_invalid() {
        let mut store = two_spot_store();
        let err = try_sign_in(&mut store, &["1", "naxx"], &user(100)).unwrap_err();
        assert!(matches!(err, SignInError::InvalidNumber { ref token, .. } if token == "naxx"));
        assert_eq!(err.free_spots(), &[1, 2]);
    }

    #[test]
    fn validation_order_prefers_invalid_over_unknown() {
        let mut store = two_spot_store();
        let err = try_sign_in(&mut store, &["9", "x"], &user(100)).unwrap_err();
        assert!(matches!(err, SignInError::InvalidNumber { .. }));
    }

    #[test]
    fn failed_batch_changes_nothing() {
        let mut store = default_store();
        try_sign_in(&mut store, &["4"], &user(100)).unwrap();
        let before = store.clone();

        // 3 and 5 are free, 4 is taken: nothing may be reserved.
        let err = try_sign_in(&mut store, &["3", "4", "5"], &user(200)).unwrap_err();
        assert!(matches!(err, SignInError::AlreadyTaken { number: 4, .. }));
        assert_eq!(store, before);

        // An unknown number in the batch also leaves everything untouched.
        let err = try_sign_in(&mut store, &["3", "42"], &user(200)).unwrap_err();
        assert!(matches!(err, SignInError::UnknownSpot { ref number, .. } if number == "42"));
        assert_eq!(store, before);
    }

    #[test]
    fn duplicates_are_collapsed() {
        let mut with_dupes = default_store();
        let mut without = default_store();

        let a = try_sign_in(&mut with_dupes, &["3", "3", "5"], &user(100)).unwrap();
        let b = try_sign_in(&mut without, &["3", "5"], &user(100)).unwrap();

        assert_eq!(a, b);
        assert_eq!(with_dupes, without);
        assert_eq!(
            a.spots.iter().map(Spot::number).collect::<Vec<_>>(),
            vec![3, 5]
        );
    }

    #[test]
    fn padded_numbers_refer_to_the_same_spot() {
        let mut store = default_store();
        let confirmation = try_sign_in(&mut store, &["03", "3"], &user(100)).unwrap();
        assert_eq!(confirmation.spots.len(), 1);
    }

    #[test]
    fn free_list_never_contains_occupied_spots() {
        let mut store = default_store();
        try_sign_in(&mut store, &["2", "7"], &user(100)).unwrap();
        let err = try_sign_in(&mut store, &["2"], &user(200)).unwrap_err();
        assert!(!err.free_spots().contains(&2));
        assert!(!err.free_spots().contains(&7));
        assert_eq!(err.free_spots().len(), 8);
    }

    #[test]
    fn sign_out_releases_only_own_spots() {
        let mut store = default_store();
        try_sign_in(&mut store, &["1", "2"], &user(100)).unwrap();
        try_sign_in(&mut store, &["3"], &user(200)).unwrap();

        let location = store.find_layer_by_channel_name_mut(CHANNEL).unwrap();
        let released = sign_out(location, UserId::new(100)).unwrap();
        assert_eq!(
            released.spots.iter().map(Spot::number).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let layer = layer(&store);
        assert!(layer.spot(1).unwrap().is_free());
        assert!(layer.spot(2).unwrap().is_free());
        assert_eq!(layer.spot(3).unwrap().occupant(), Some(&user(200)));
    }

    #[test]
    fn sign_out_without_spots_fails() {
        let mut store = default_store();
        let location = store.find_layer_by_channel_name_mut(CHANNEL).unwrap();
        let err = sign_out(location, UserId::new(100)).unwrap_err();
        assert_eq!(err.free.len(), 10);
    }

    #[test]
    fn reset_frees_everything() {
        let mut store = default_store();
        try_sign_in(&mut store, &["1", "2"], &user(100)).unwrap();
        try_sign_in(&mut store, &["3"], &user(200)).unwrap();

        let location = store.find_layer_by_channel_name_mut(CHANNEL).unwrap();
        assert_eq!(reset_layer(location), 3);
        assert_eq!(layer(&store).free_spot_count(), 10);
    }

    #[test]
    fn pick_sets_timer() {
        let mut store = default_store();
        let at = Utc.with_ymd_and_hms(2023, 5, 1, 10, 0, 0).unwrap();
        let location = store.find_layer_by_channel_name_mut(CHANNEL).unwrap();
        record_pick(location, at);
        assert_eq!(layer(&store).last_event_time, Some(at));
    }
}
