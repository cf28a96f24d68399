//! Pull-based stream of (shipment, product) pairs flattened from pending orders.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::FulfillmentError;
use crate::localization::PartLocator;
use crate::shutdown::ShutdownSignal;
use crate::types::{BuildItem, Order, Product, ProductSpec, ShipmentRef};

struct PendingProduct {
    shipment: ShipmentRef,
    spec: ProductSpec,
}

struct QueueState {
    pending: VecDeque<PendingProduct>,
    closed: bool,
}

/// FIFO of products awaiting fulfillment, fed by the order feed and bound to
/// parts from the locator as they are pulled.
pub struct BuildQueue {
    inner: Mutex<QueueState>,
    available: Condvar,
    locator: Arc<PartLocator>,
    localization_timeout: Option<Duration>,
    poll: Duration,
}

impl BuildQueue {
    pub fn new(
        locator: Arc<PartLocator>,
        localization_timeout: Option<Duration>,
        poll: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueState {
                pending: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            locator,
            localization_timeout,
            poll,
        }
    }

    /// Flatten an order into per-product entries; returns it back if closed.
    ///
    /// The whole order is appended under one lock, so an order arriving
    /// mid-shipment lands after the current shipment's remaining products.
    pub fn push_order(&self, order: Order) -> Result<(), Order> {
        let mut guard = self.inner.lock().expect("build queue mutex poisoned");
        if guard.closed {
            return Err(order);
        }
        let mut added = 0usize;
        for shipment in order.shipments {
            let shipment_ref = ShipmentRef::of(&shipment);
            for spec in shipment.products {
                guard.pending.push_back(PendingProduct {
                    shipment: shipment_ref.clone(),
                    spec,
                });
                added += 1;
            }
        }
        info!(order = %order.order_id, products = added, "order queued");
        self.available.notify_all();
        Ok(())
    }

    /// Signal that no further orders will arrive and wake blocked pullers.
    pub fn close(&self) {
        let mut guard = self.inner.lock().expect("build queue mutex poisoned");
        guard.closed = true;
        self.available.notify_all();
    }

    /// True while orders may still arrive or products remain queued.
    pub fn has_pending(&self) -> bool {
        let guard = self.inner.lock().expect("build queue mutex poisoned");
        !guard.closed || !guard.pending.is_empty()
    }

    pub fn locator(&self) -> &PartLocator {
        &self.locator
    }

    fn pop_blocking_or_closed(
        &self,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<PendingProduct>, FulfillmentError> {
        let mut guard = self.inner.lock().expect("build queue mutex poisoned");
        loop {
            if shutdown.is_triggered() {
                return Err(FulfillmentError::Cancelled);
            }
            if let Some(pending) = guard.pending.pop_front() {
                return Ok(Some(pending));
            }
            if guard.closed {
                return Ok(None);
            }
            let (next, _) = self
                .available
                .wait_timeout(guard, self.poll)
                .expect("condvar wait failed");
            guard = next;
        }
    }

    /// Pull the next product and bind it to an observed part.
    ///
    /// Blocks until a product is queued and a matching part is visible.
    /// Returns `Ok(None)` once the queue is closed and drained.
    pub fn next(&self, shutdown: &ShutdownSignal) -> Result<Option<BuildItem>, FulfillmentError> {
        let Some(pending) = self.pop_blocking_or_closed(shutdown)? else {
            return Ok(None);
        };
        let part = self
            .locator
            .claim(
                &pending.spec.product_type,
                None,
                self.localization_timeout,
                shutdown,
            )
            .map_err(|err| err.for_shipment(&pending.shipment))?;
        debug!(
            shipment = %pending.shipment,
            product_type = %pending.spec.product_type,
            sensor = %part.source,
            "product bound to part"
        );
        let lane = pending.shipment.lane.clone();
        Ok(Some(BuildItem {
            shipment: pending.shipment,
            product: Product::new(pending.spec, lane, part),
        }))
    }

    /// Replace the product's part with an observation strictly fresher than
    /// the one it currently holds.
    pub fn requery(
        &self,
        shipment: &ShipmentRef,
        product: &mut Product,
        shutdown: &ShutdownSignal,
    ) -> Result<(), FulfillmentError> {
        let part = self
            .locator
            .claim(
                &product.product_type,
                Some(product.assigned_part.seq),
                self.localization_timeout,
                shutdown,
            )
            .map_err(|err| err.for_shipment(shipment))?;
        debug!(
            product_type = %product.product_type,
            stale_seq = product.assigned_part.seq,
            fresh_seq = part.seq,
            "part re-queried"
        );
        product.reassign(part);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartSighting, Pose, Shipment};
    use std::sync::mpsc;
    use std::thread;

    fn shipment(sequence: u32, lane: &str, types: &[&str]) -> Shipment {
        Shipment {
            sequence,
            lane: lane.to_string(),
            shipment_type: format!("order_0_shipment_{sequence}"),
            products: types
                .iter()
                .map(|t| ProductSpec::new(*t, Pose::from_translation(0.1, 0.1, 0.0)))
                .collect(),
        }
    }

    fn stocked_queue(types: &[&str]) -> BuildQueue {
        let locator = Arc::new(PartLocator::new(Duration::from_millis(5)));
        locator.observe_frame(
            "bin_cam",
            types
                .iter()
                .map(|t| PartSighting::new(*t, Pose::from_translation(1.0, 1.0, 0.0)))
                .collect(),
        );
        BuildQueue::new(locator, Some(Duration::from_millis(50)), Duration::from_millis(5))
    }

    #[test]
    fn flattens_orders_in_arrival_order() {
        let queue = stocked_queue(&["gear", "pulley", "disk"]);
        let shutdown = ShutdownSignal::new();
        let order = Order {
            order_id: "order_0".to_string(),
            shipments: vec![
                shipment(1, "agv1", &["gear", "pulley"]),
                shipment(2, "agv2", &["disk"]),
            ],
        };
        queue.push_order(order).expect("queue closed");
        queue.close();

        let mut seen = Vec::new();
        while let Some(item) = queue.next(&shutdown).expect("next") {
            assert_eq!(item.product.lane, item.shipment.lane);
            seen.push((item.shipment.sequence, item.product.product_type));
        }
        assert_eq!(
            seen,
            vec![
                (1, "gear".to_string()),
                (1, "pulley".to_string()),
                (2, "disk".to_string()),
            ]
        );
        assert!(!queue.has_pending());
    }

    #[test]
    fn has_pending_until_closed_and_drained() {
        let queue = stocked_queue(&["gear"]);
        assert!(queue.has_pending());
        queue
            .push_order(Order {
                order_id: "order_0".to_string(),
                shipments: vec![shipment(1, "agv1", &["gear"])],
            })
            .expect("queue closed");
        queue.close();
        assert!(queue.has_pending());
        queue.next(&ShutdownSignal::new()).expect("next").expect("item");
        assert!(!queue.has_pending());
    }

    #[test]
    fn push_fails_after_close() {
        let queue = stocked_queue(&[]);
        queue.close();
        let order = Order {
            order_id: "late".to_string(),
            shipments: Vec::new(),
        };
        assert!(queue.push_order(order).is_err());
    }

    #[test]
    fn next_wakes_on_order_arrival() {
        let queue = Arc::new(stocked_queue(&["gear"]));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let puller = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("ready");
            let item = puller
                .next(&ShutdownSignal::new())
                .expect("next")
                .expect("item");
            done_tx.send(item.shipment.sequence).expect("done");
        });

        ready_rx.recv_timeout(Duration::from_secs(1)).expect("ready");
        queue
            .push_order(Order {
                order_id: "order_1".to_string(),
                shipments: vec![shipment(4, "agv2", &["gear"])],
            })
            .expect("queue closed");
        let sequence = done_rx.recv_timeout(Duration::from_secs(1)).expect("pulled");
        assert_eq!(sequence, 4);
        handle.join().expect("puller panicked");
    }

    #[test]
    fn next_returns_none_when_closed_while_blocked() {
        let queue = Arc::new(stocked_queue(&[]));
        let (done_tx, done_rx) = mpsc::channel();
        let puller = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            let item = puller.next(&ShutdownSignal::new()).expect("next");
            done_tx.send(item.is_none()).expect("done");
        });
        queue.close();
        assert!(done_rx.recv_timeout(Duration::from_secs(1)).expect("unblocked"));
        handle.join().expect("puller panicked");
    }

    #[test]
    fn next_is_cancelled_by_shutdown() {
        let queue = stocked_queue(&[]);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        assert!(matches!(queue.next(&shutdown), Err(FulfillmentError::Cancelled)));
    }

    #[test]
    fn missing_part_times_out_with_shipment_attached() {
        let queue = stocked_queue(&[]);
        queue
            .push_order(Order {
                order_id: "order_0".to_string(),
                shipments: vec![shipment(3, "agv1", &["battery"])],
            })
            .expect("queue closed");
        match queue.next(&ShutdownSignal::new()) {
            Err(FulfillmentError::LocalizationTimeout {
                shipment, part_type, ..
            }) => {
                assert_eq!(shipment.sequence, 3);
                assert_eq!(part_type, "battery");
            }
            other => panic!("expected localization timeout, got {other:?}"),
        }
    }

    #[test]
    fn requery_takes_a_fresher_part() {
        let queue = stocked_queue(&["gear"]);
        let shutdown = ShutdownSignal::new();
        queue
            .push_order(Order {
                order_id: "order_0".to_string(),
                shipments: vec![shipment(1, "agv1", &["gear"])],
            })
            .expect("queue closed");
        let mut item = queue.next(&shutdown).expect("next").expect("item");
        let stale_seq = item.product.assigned_part.seq;

        queue.locator().observe_frame(
            "drop_cam",
            vec![PartSighting::new("gear", Pose::from_translation(2.0, -1.0, 0.0))],
        );
        queue
            .requery(&item.shipment, &mut item.product, &shutdown)
            .expect("requery");
        assert!(item.product.assigned_part.seq > stale_seq);
        assert_eq!(item.product.assigned_part.source, "drop_cam");
        assert_eq!(item.product.working_pose, item.product.assigned_part.pose);
    }
}
