//! Running-average rating aggregation

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::User;
use crate::store::RatingAggregateChange;

/// Fold one rating into an aggregate, returning `(total, average)`.
///
/// The average is rounded to 2 decimal places, half away from zero.
pub fn running_average(old_average: Decimal, old_total: i32, rating: i32) -> (i32, Decimal) {
    let total = old_total + 1;
    let average = (old_average * Decimal::from(old_total) + Decimal::from(rating))
        / Decimal::from(total);
    (
        total,
        average.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    )
}

/// Aggregate change for `target` receiving `rating`, guarded by the count it was read at
pub fn aggregate_change(target: &User, rating: i32) -> RatingAggregateChange {
    let (total_ratings, average_rating) =
        running_average(target.average_rating, target.total_ratings, rating);
    RatingAggregateChange {
        user_id: target.id,
        expected_total_ratings: target.total_ratings,
        total_ratings,
        average_rating,
    }
}
