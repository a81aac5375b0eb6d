//! Monotone order merge policy and server-id rekey.
//!
//! Grounded on `polymarket/legacy/order_manager.rs::on_order_event`'s
//! status-transition reasoning, generalised to the exact priority order and
//! fill-accumulation rules the design names.

use crate::domain::{Order, OrderStatus};

/// Merges `src` (an incoming observation — a server response, a WS event, or
/// a reconciler finding) into `dst` (the engine's current record) in place,
/// never allowing a confirmed terminal status to be demoted.
pub fn merge_order_in_place(dst: &mut Order, src: &Order) {
    let dst_confirmed_final = dst.status.is_final() && (dst.filled_at.is_some() || dst.canceled_at.is_some());

    if dst_confirmed_final && !src.status.is_final() {
        // fill-up FilledSize/FilledAt only, never downgrade status.
        if src.filled_size > dst.filled_size {
            dst.filled_size = src.filled_size;
            if src.filled_at.is_some() {
                dst.filled_at = src.filled_at;
            }
        }
        return;
    }

    // Copy missing metadata; take the richer of the two sizes/prices.
    if dst.market_slug.is_empty() {
        dst.market_slug = src.market_slug.clone();
    }
    if dst.asset_id.is_empty() {
        dst.asset_id = src.asset_id.clone();
    }
    if dst.token_type.is_none() {
        dst.token_type = src.token_type;
    }
    if src.size > dst.size {
        dst.size = src.size;
    }
    if src.price.0 != 0 && dst.price.0 == 0 {
        dst.price = src.price;
    }

    dst.filled_size = dst.filled_size.max(src.filled_size);

    if dst.filled_price.is_none() {
        dst.filled_price = src.filled_price;
    }
    if dst.filled_at.is_none() {
        dst.filled_at = src.filled_at;
    }
    if dst.canceled_at.is_none() {
        dst.canceled_at = src.canceled_at;
    }
    if src.last_error.is_some() {
        dst.last_error = src.last_error.clone();
    }

    resolve_status(dst, src.status);
}

/// Status resolution priority: `filled > failed > canceled > canceling >
/// open > partial(with fills>0) > pending`.
fn resolve_status(dst: &mut Order, src_status: OrderStatus) {
    if dst.filled_size >= dst.size && dst.size > 0.0 {
        dst.status = OrderStatus::Filled;
        if dst.filled_at.is_none() {
            dst.filled_at = Some(dst.created_at.max(0));
        }
        return;
    }
    if dst.filled_size > 0.0 && !dst.status.is_final() {
        dst.status = OrderStatus::Partial;
        return;
    }
    dst.status = dst.status.strongest(src_status);
}

/// Server-id rekey: when an `UpdateOrder` success arrives with
/// `original_order_id != order.order_id`, the caller removes the local-id
/// entries from `open_orders`/`order_store`, renames `existing.order_id`,
/// merges, and reinserts. This function performs the rename + merge; the
/// map surgery is the engine's responsibility since it owns both maps.
pub fn rekey_and_merge(existing: &mut Order, incoming: &Order) {
    existing.order_id = incoming.order_id.clone();
    merge_order_in_place(existing, incoming);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, Price, Side};

    fn base_order() -> Order {
        Order::new("m".into(), "a".into(), Side::Buy, Price::from_cents(50), 10.0)
    }

    #[test]
    fn confirmed_terminal_is_never_downgraded() {
        let mut dst = base_order();
        dst.status = OrderStatus::Filled;
        dst.filled_size = 10.0;
        dst.filled_at = Some(100);

        let mut src = base_order();
        src.status = OrderStatus::Open; // a stale WS event arriving late
        src.filled_size = 0.0;

        merge_order_in_place(&mut dst, &src);
        assert_eq!(dst.status, OrderStatus::Filled);
    }

    #[test]
    fn fills_up_even_when_confirmed_terminal() {
        let mut dst = base_order();
        dst.status = OrderStatus::Canceled;
        dst.canceled_at = Some(50);
        dst.filled_size = 2.0;

        let mut src = base_order();
        src.status = OrderStatus::Open;
        src.filled_size = 4.0;

        merge_order_in_place(&mut dst, &src);
        assert_eq!(dst.status, OrderStatus::Canceled);
        assert_eq!(dst.filled_size, 4.0);
    }

    #[test]
    fn full_fill_promotes_to_filled() {
        let mut dst = base_order();
        dst.status = OrderStatus::Open;
        let mut src = base_order();
        src.filled_size = 10.0;
        merge_order_in_place(&mut dst, &src);
        assert_eq!(dst.status, OrderStatus::Filled);
        assert!(dst.filled_at.is_some());
    }

    #[test]
    fn partial_fill_sets_partial_unless_final() {
        let mut dst = base_order();
        dst.status = OrderStatus::Open;
        let mut src = base_order();
        src.filled_size = 4.0;
        merge_order_in_place(&mut dst, &src);
        assert_eq!(dst.status, OrderStatus::Partial);
    }

    #[test]
    fn status_priority_without_fills_takes_strongest() {
        let mut dst = base_order();
        dst.status = OrderStatus::Pending;
        let src = {
            let mut s = base_order();
            s.status = OrderStatus::Canceling;
            s
        };
        merge_order_in_place(&mut dst, &src);
        assert_eq!(dst.status, OrderStatus::Canceling);
    }

    #[test]
    fn rekey_renames_and_merges() {
        let mut existing = base_order();
        existing.order_id = "local_abc".into();
        existing.status = OrderStatus::Pending;

        let mut incoming = base_order();
        incoming.order_id = "S1".into();
        incoming.status = OrderStatus::Open;

        rekey_and_merge(&mut existing, &incoming);
        assert_eq!(existing.order_id, "S1");
        assert_eq!(existing.status, OrderStatus::Open);
    }
}
