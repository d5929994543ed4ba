//! Per-ride serialization under real threads.

use std::sync::{Arc, Barrier};
use std::thread;

use ride_core::{Caller, CommandId, Location, RideId, UserId};
use ride_orchestrator::{Collaborators, Gateways, Orchestrator, OrchestratorConfig, OrchestratorError, SystemClock};
use ride_state::{DriverProfile, RideError, RideRequest, RideStatus, RideView, RiderProfile};

fn gateways() -> Gateways {
    let (orchestrator, _worker) = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(SystemClock),
        Collaborators::in_memory(),
    );
    Gateways::new(Arc::new(orchestrator))
}

fn request(name: &str) -> RideRequest {
    RideRequest {
        pickup: Location::address(format!("{name} pickup")),
        dropoff: Location::address(format!("{name} dropoff")),
        passenger_count: 1,
        rider: RiderProfile {
            display_name: name.to_string(),
            phone: None,
            rating: None,
        },
        fare_estimate: None,
    }
}

fn profile(plate: &str) -> DriverProfile {
    DriverProfile {
        display_name: format!("driver {plate}"),
        phone: None,
        vehicle: "Sedan".into(),
        license_plate: plate.to_string(),
        rating: None,
    }
}

#[test]
fn concurrent_accepts_have_exactly_one_winner() {
    let g = gateways();
    let system = Caller::system(UserId::new());

    for round in 0..25 {
        let rider = Caller::rider(UserId::new());
        let id = g.rider.request(&rider, request(&format!("r{round}")), None).unwrap().view.ride_id();
        g.operations.begin_matching(&system, id, None).unwrap();

        let contenders: Vec<Caller> = (0..4).map(|_| Caller::driver(UserId::new())).collect();
        let barrier = Arc::new(Barrier::new(contenders.len()));
        let handles: Vec<_> = contenders
            .iter()
            .enumerate()
            .map(|(i, driver)| {
                let g = g.clone();
                let barrier = Arc::clone(&barrier);
                let driver = *driver;
                thread::spawn(move || {
                    barrier.wait();
                    (driver, g.driver.accept(&driver, id, profile(&format!("P-{i}")), None))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<Caller> = results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(d, _)| *d)
            .collect();
        assert_eq!(winners.len(), 1, "round {round}: exactly one accept must succeed");

        for (_, result) in results.iter().filter(|(_, r)| r.is_err()) {
            assert_eq!(
                result.as_ref().unwrap_err(),
                &OrchestratorError::Ride(RideError::AlreadyAccepted { ride_id: id })
            );
        }

        let RideView::Rider(view) = g.rider.view(&rider, id).unwrap() else {
            panic!("expected rider view");
        };
        assert_eq!(view.status, RideStatus::Accepted);
        assert_eq!(view.driver.unwrap().driver_id, winners[0].user_id);
    }
}

#[test]
fn independent_rides_progress_in_parallel() {
    let g = gateways();
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let g = g.clone();
            thread::spawn(move || -> RideId {
                let rider = Caller::rider(UserId::new());
                let driver = Caller::driver(UserId::new());
                let id = g.rider.request(&rider, request(&format!("p{i}")), None).unwrap().view.ride_id();
                g.driver.accept(&driver, id, profile(&format!("Q-{i}")), None).unwrap();
                g.driver.start_pickup(&driver, id, None).unwrap();
                g.driver.mark_arrived(&driver, id, None).unwrap();
                g.driver.start_trip(&driver, id, None).unwrap();
                let done = g.driver.complete_trip(&driver, id, None).unwrap();
                assert_eq!(done.view.status(), RideStatus::Completed);
                id
            })
        })
        .collect();
    let ids: Vec<RideId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 16);
}

#[test]
fn concurrent_requests_with_one_key_create_one_ride() {
    let g = gateways();
    for round in 0..25 {
        let rider = Caller::rider(UserId::new());
        let key = CommandId::new();
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = g.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    g.rider.request(&rider, request(&format!("k{round}")), Some(key))
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        let created = outcomes.iter().filter(|o| !o.replayed).count();
        assert_eq!(created, 1, "round {round}: one request creates, the rest replay");
        let first = outcomes[0].view.ride_id();
        assert!(outcomes.iter().all(|o| o.view.ride_id() == first));
    }
}
