//! Cursor movement.
//!
//! Each step searches afresh from the cursor's position, so records
//! written or deleted between steps are seen.

use super::CursorRecord;
use crate::engine::EngineState;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexEntries;
use crate::operation::{read_value, Source};
use crate::range::KeyRange;
use crate::request::Outcome;
use crate::store::RecordStore;
use crate::types::{CursorDirection, CursorId};
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;
use tessera_codec::Key;

fn bounds(range: Option<&KeyRange>) -> (Bound<&Key>, Bound<&Key>) {
    match range {
        Some(r) => (r.start_bound(), r.end_bound()),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

/// The tighter of two lower bounds.
fn max_lower<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.cmp(y) {
                Ordering::Greater => a,
                Ordering::Less => b,
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a,
                Ordering::Equal => b,
            }
        }
    }
}

/// The tighter of two upper bounds.
fn min_upper<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.cmp(y) {
                Ordering::Less => a,
                Ordering::Greater => b,
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a,
                Ordering::Equal => b,
            }
        }
    }
}

/// Next record key for a store cursor.
pub(crate) fn find_in_store(
    records: &RecordStore,
    range: Option<&KeyRange>,
    direction: CursorDirection,
    position: Option<&Key>,
    target: Option<&Key>,
) -> Option<Key> {
    let (start, end) = bounds(range);
    if direction.is_forward() {
        let mut lower = start;
        if let Some(target) = target {
            lower = max_lower(lower, Bound::Included(target));
        }
        if let Some(position) = position {
            lower = max_lower(lower, Bound::Excluded(position));
        }
        records.bounded(lower, end).next().map(|(k, _)| k.clone())
    } else {
        let mut upper = end;
        if let Some(target) = target {
            upper = min_upper(upper, Bound::Included(target));
        }
        if let Some(position) = position {
            upper = min_upper(upper, Bound::Excluded(position));
        }
        records.bounded(start, upper).next_back().map(|(k, _)| k.clone())
    }
}

/// Next (index key, primary key) entry for an index cursor.
///
/// `position` is the cursor's current entry. `target_primary` is only
/// meaningful together with `target`.
pub(crate) fn find_in_index(
    entries: &IndexEntries,
    range: Option<&KeyRange>,
    direction: CursorDirection,
    position: Option<(&Key, &Key)>,
    target: Option<&Key>,
    target_primary: Option<&Key>,
) -> Option<(Key, Key)> {
    let (start, end) = bounds(range);
    let target_pair = target.zip(target_primary);
    match direction {
        CursorDirection::Next => {
            let mut lower = start;
            if let Some(target) = target {
                lower = max_lower(lower, Bound::Included(target));
            }
            if let Some((key, _)) = position {
                lower = max_lower(lower, Bound::Included(key));
            }
            for (key, primaries) in entries.bounded(lower, end) {
                for primary in primaries {
                    if position.is_some_and(|(pk, pp)| key == pk && primary <= pp) {
                        continue;
                    }
                    if target_pair.is_some_and(|(tk, tp)| key == tk && primary < tp) {
                        continue;
                    }
                    return Some((key.clone(), primary.clone()));
                }
            }
            None
        }
        CursorDirection::NextUnique => {
            let mut lower = start;
            if let Some(target) = target {
                lower = max_lower(lower, Bound::Included(target));
            }
            if let Some((key, _)) = position {
                lower = max_lower(lower, Bound::Excluded(key));
            }
            let (key, primaries) = entries.bounded(lower, end).next()?;
            primaries.first().map(|p| (key.clone(), p.clone()))
        }
        CursorDirection::Prev => {
            let mut upper = end;
            if let Some(target) = target {
                upper = min_upper(upper, Bound::Included(target));
            }
            if let Some((key, _)) = position {
                upper = min_upper(upper, Bound::Included(key));
            }
            for (key, primaries) in entries.bounded(start, upper).rev() {
                for primary in primaries.iter().rev() {
                    if position.is_some_and(|(pk, pp)| key == pk && primary >= pp) {
                        continue;
                    }
                    if target_pair.is_some_and(|(tk, tp)| key == tk && primary > tp) {
                        continue;
                    }
                    return Some((key.clone(), primary.clone()));
                }
            }
            None
        }
        CursorDirection::PrevUnique => {
            let mut upper = end;
            if let Some(target) = target {
                upper = min_upper(upper, Bound::Included(target));
            }
            if let Some((key, _)) = position {
                upper = min_upper(upper, Bound::Excluded(key));
            }
            let (key, primaries) = entries.bounded(start, upper).next_back()?;
            primaries.first().map(|p| (key.clone(), p.clone()))
        }
    }
}

/// Advances a cursor `count` steps and loads the record it lands on.
pub(crate) fn iterate(
    st: &mut EngineState,
    id: CursorId,
    target: Option<&Key>,
    target_primary: Option<&Key>,
    count: u32,
) -> CoreResult<Outcome> {
    let cursor: &CursorRecord = st
        .cursors
        .get(&id)
        .ok_or_else(|| CoreError::invalid_state(format!("unknown cursor {id}")))?;
    let mut position = cursor.position.clone();
    let mut store_position = cursor.object_store_position.clone();
    let mut found = None;
    for _ in 0..count.max(1) {
        let hit = match cursor.source {
            Source::Store(store) => find_in_store(
                &st.store(store)?.records,
                cursor.range.as_ref(),
                cursor.direction,
                position.as_ref(),
                target,
            )
            .map(|key| (key.clone(), key)),
            Source::Index(index) => find_in_index(
                &st.index(index)?.entries,
                cursor.range.as_ref(),
                cursor.direction,
                position.as_ref().zip(store_position.as_ref()),
                target,
                target_primary,
            ),
        };
        match hit {
            Some((key, primary)) => {
                position = Some(key.clone());
                store_position = Some(primary.clone());
                found = Some((key, primary));
            }
            None => {
                found = None;
                break;
            }
        }
    }

    let value = match (&found, cursor.key_only) {
        (Some((_, primary)), false) => read_value(st, cursor.store, primary)?,
        _ => None,
    };
    let cursor = st
        .cursors
        .get_mut(&id)
        .ok_or_else(|| CoreError::invalid_state(format!("unknown cursor {id}")))?;
    match found {
        None => {
            cursor.key = None;
            cursor.primary_key = None;
            cursor.value = None;
            Ok(Outcome::Cursor(None))
        }
        Some((key, primary)) => {
            cursor.position = Some(key.clone());
            cursor.object_store_position = Some(primary.clone());
            cursor.key = Some(key);
            cursor.primary_key = Some(primary);
            cursor.value = value;
            cursor.got_value = true;
            Ok(Outcome::Cursor(Some((id, Arc::clone(&cursor.retired)))))
        }
    }
}
