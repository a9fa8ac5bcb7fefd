use super::*;
use crate::config::ScanTemplates;
use crate::factory::TemplateScanFactory;
use crate::scan::{Analyzer, CandidateId};
use tracing_test::traced_test;

fn acquisition(cvs: &[f64]) -> AcquisitionConfig {
    AcquisitionConfig {
        cv_values: cvs.to_vec(),
        ..AcquisitionConfig::default()
    }
}

fn scheduler(config: &AcquisitionConfig) -> ScanScheduler {
    ScanScheduler::new(config, Arc::new(TemplateScanFactory::default()))
}

fn targeted(cv: Option<f64>, id: u64) -> ScanRequest {
    ScanRequest::new(ScanKind::Targeted, Analyzer::IonTrap, 120.0, 2000.0)
        .with_cv(cv)
        .with_candidate(CandidateId(id))
}

fn drain(scheduler: &ScanScheduler, n: usize) -> Vec<ScanRequest> {
    (0..n).map(|_| scheduler.dequeue()).collect()
}

fn survey_cvs(requests: &[ScanRequest]) -> Vec<f64> {
    requests
        .iter()
        .filter(|r| r.kind() == ScanKind::Survey)
        .filter_map(ScanRequest::cv)
        .collect()
}

/// Run discovery to completion with the given counts, leaving the scheduler
/// at the start of allocation.
fn planned(config: &AcquisitionConfig, counts: &[usize]) -> ScanScheduler {
    let scheduler = scheduler(config);
    drain(&scheduler, 2 * config.cv_values.len());
    for (&cv, &count) in config.cv_values.iter().zip(counts) {
        let _ = scheduler.record_feedback(cv, count);
    }
    scheduler
}

#[test]
fn test_dequeue_never_empty_after_construction() {
    let scheduler = scheduler(&acquisition(&[-45.0, -60.0, -75.0]));
    assert_eq!(scheduler.phase(), SchedulerPhase::Discovery);

    let first = scheduler.dequeue();
    assert_eq!(first.kind(), ScanKind::Agc);
    assert_eq!(first.cv(), Some(-45.0));
    assert_eq!(scheduler.phase(), SchedulerPhase::Unplanned { attempts: 0 });
}

#[test]
fn test_discovery_visits_each_condition_once() {
    let scheduler = scheduler(&acquisition(&[-45.0, -60.0, -75.0]));
    let issued = drain(&scheduler, 6);

    assert_eq!(survey_cvs(&issued), vec![-45.0, -60.0, -75.0]);
    assert_eq!(scheduler.pending_len(), 0);

    let stats = scheduler.stats();
    assert_eq!(stats.discovery_rounds, 1);
    assert_eq!(stats.issued_survey, 3);
    assert_eq!(stats.issued_agc, 3);
    // Discovery leaves the last condition active.
    assert_eq!(stats.current_cv, Some(-75.0));
}

#[test]
fn test_discovery_restarts_after_five_unplanned_attempts() {
    let config = acquisition(&[-45.0, -60.0]);
    let scheduler = scheduler(&config);
    drain(&scheduler, 4);
    assert_eq!(scheduler.record_feedback(-45.0, 10), FeedbackOutcome::Recorded);

    for attempt in 1..=MAX_UNPLANNED_ATTEMPTS {
        let pair = drain(&scheduler, 2);
        assert_eq!(survey_cvs(&pair), vec![-60.0]);
        assert_eq!(scheduler.phase(), SchedulerPhase::Unplanned { attempts: attempt });
    }

    let restart = scheduler.dequeue();
    assert_eq!(restart.cv(), Some(-45.0));
    assert_eq!(scheduler.stats().discovery_rounds, 2);
    assert!(scheduler.conditions().iter().all(|c| !c.planned));
    // Counts from the abandoned round do not carry over.
    assert_eq!(scheduler.record_feedback(-45.0, 12), FeedbackOutcome::Recorded);
}

#[test]
fn test_enqueue_then_dequeue_returns_request_verbatim() {
    let config = AcquisitionConfig {
        cycling_enabled: false,
        ..acquisition(&[])
    };
    let scheduler = scheduler(&config);
    let request = targeted(None, 9).with_group(4).with_charge(3);

    assert_eq!(
        scheduler.enqueue(request.clone()),
        EnqueueOutcome::Queued { position: 0 }
    );
    assert_eq!(scheduler.dequeue(), request);
    assert_eq!(scheduler.stats().issued_targeted, 1);
}

#[test]
fn test_stale_condition_is_rejected() {
    let scheduler = scheduler(&acquisition(&[-45.0, -60.0]));
    scheduler.dequeue();

    let outcome = scheduler.enqueue(targeted(Some(-45.0), 1));
    assert_eq!(outcome, EnqueueOutcome::Rejected(RejectReason::StaleCondition));
    assert!(!outcome.is_accepted());

    // Active condition and CV-less requests are accepted.
    assert_eq!(
        scheduler.enqueue(targeted(Some(-60.0), 2)),
        EnqueueOutcome::Queued { position: 3 }
    );
    assert!(scheduler.enqueue(targeted(None, 3)).is_accepted());
    assert_eq!(scheduler.stats().rejected_stale, 1);
}

#[test]
fn test_queued_position_tracks_current_length() {
    let config = AcquisitionConfig {
        cycling_enabled: false,
        ..acquisition(&[])
    };
    let scheduler = scheduler(&config);

    assert_eq!(
        scheduler.enqueue(targeted(None, 0)),
        EnqueueOutcome::Queued { position: 0 }
    );
    assert_eq!(
        scheduler.enqueue(targeted(None, 1)),
        EnqueueOutcome::Queued { position: 1 }
    );
    // The fast path pops without the planner lock; the next position is the
    // length left behind, not a running insertion count.
    assert_eq!(scheduler.dequeue().candidate(), Some(CandidateId(0)));
    assert_eq!(
        scheduler.enqueue(targeted(None, 2)),
        EnqueueOutcome::Queued { position: 1 }
    );
}

#[test]
fn test_saturated_queue_is_rejected() {
    let config = AcquisitionConfig {
        cycling_enabled: false,
        max_targeted_per_survey: 2,
        ..acquisition(&[])
    };
    let scheduler = scheduler(&config);

    for position in 0..=2 {
        assert_eq!(
            scheduler.enqueue(targeted(None, position as u64)),
            EnqueueOutcome::Queued { position }
        );
    }
    assert_eq!(
        scheduler.enqueue(targeted(None, 3)),
        EnqueueOutcome::Rejected(RejectReason::QueueSaturated)
    );
    assert_eq!(scheduler.stats().rejected_saturated, 1);
}

#[test]
fn test_budget_split_thirty_to_ten() {
    let config = acquisition(&[-45.0, -60.0]);
    let scheduler = scheduler(&config);
    drain(&scheduler, 4);

    assert_eq!(scheduler.record_feedback(-45.0, 30), FeedbackOutcome::Recorded);
    assert_eq!(scheduler.record_feedback(-45.0, 99), FeedbackOutcome::Ignored);
    assert_eq!(
        scheduler.record_feedback(-90.0, 5),
        FeedbackOutcome::UnknownCondition
    );
    assert_eq!(
        scheduler.record_feedback(-60.0, 10),
        FeedbackOutcome::PlanningComplete
    );

    let budgets: Vec<Option<u32>> = scheduler
        .conditions()
        .iter()
        .map(|c| c.max_allowed)
        .collect();
    assert_eq!(budgets, vec![Some(15), Some(5)]);
    assert_eq!(
        scheduler.phase(),
        SchedulerPhase::Allocating { condition: 1 }
    );
}

#[test]
fn test_full_cycle_respects_budgets_then_rediscovers() {
    let config = acquisition(&[-45.0, -60.0]);
    let scheduler = planned(&config, &[30, 10]);

    let issued = drain(&scheduler, 40);
    let cvs = survey_cvs(&issued);
    assert_eq!(cvs.len(), 20);
    // Last condition first, then walk down.
    assert!(cvs[..5].iter().all(|&cv| cv == -60.0));
    assert!(cvs[5..].iter().all(|&cv| cv == -45.0));
    for condition in scheduler.conditions() {
        assert_eq!(Some(condition.issued), condition.max_allowed);
    }

    let next = scheduler.dequeue();
    assert_eq!(next.kind(), ScanKind::Agc);
    let stats = scheduler.stats();
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.discovery_rounds, 2);
    assert_eq!(stats.fallbacks, 0);
}

#[test]
fn test_wrap_resorts_busiest_condition_last() {
    let config = acquisition(&[-45.0, -60.0, -75.0]);
    let scheduler = planned(&config, &[5, 30, 10]);

    // Spend the whole cycle, then trigger the restart.
    while scheduler.stats().cycles_completed == 0 {
        scheduler.dequeue();
    }
    let cvs: Vec<f64> = scheduler.conditions().iter().map(|c| c.cv).collect();
    assert_eq!(cvs, vec![-60.0, -75.0, -45.0]);
    assert_eq!(scheduler.stats().current_cv, Some(-45.0));
}

#[test]
fn test_empty_report_moves_to_previous_condition() {
    let config = acquisition(&[-45.0, -60.0]);
    let scheduler = planned(&config, &[30, 10]);

    assert!(!scheduler.report_empty(-45.0));
    assert!(scheduler.report_empty(-60.0));
    assert_eq!(scheduler.conditions()[1].max_allowed, None);

    let next = scheduler.dequeue();
    assert_eq!(next.cv(), Some(-45.0));
    assert_eq!(
        scheduler.phase(),
        SchedulerPhase::Allocating { condition: 0 }
    );
}

#[test]
fn test_switch_interval_rotates_with_wrap() {
    let config = AcquisitionConfig {
        switch_interval: 2,
        ..acquisition(&[-45.0, -60.0])
    };
    let scheduler = planned(&config, &[30, 10]);

    let cvs = survey_cvs(&drain(&scheduler, 12));
    assert_eq!(cvs, vec![-60.0, -60.0, -45.0, -45.0, -60.0, -60.0]);
}

#[test]
fn test_unconstrained_switch_prefers_largest_remaining() {
    let config = AcquisitionConfig {
        step_constrained: false,
        ..acquisition(&[-45.0, -60.0, -75.0])
    };
    // Budgets 2, 10, 8 with the last condition active.
    let scheduler = planned(&config, &[10, 50, 40]);
    assert_eq!(
        scheduler
            .conditions()
            .iter()
            .map(|c| c.max_allowed)
            .collect::<Vec<_>>(),
        vec![Some(2), Some(10), Some(8)]
    );

    let cvs = survey_cvs(&drain(&scheduler, 2 * 9));
    assert!(cvs[..8].iter().all(|&cv| cv == -75.0));
    assert_eq!(cvs[8], -60.0);
}

#[test]
fn test_shelved_request_released_on_visit() {
    let config = AcquisitionConfig {
        shelve_stale_targets: true,
        ..acquisition(&[-45.0, -60.0])
    };
    let scheduler = scheduler(&config);
    scheduler.dequeue();

    let request = targeted(Some(-45.0), 11);
    assert_eq!(scheduler.enqueue(request.clone()), EnqueueOutcome::Shelved);
    assert_eq!(scheduler.pending_len(), 3);
    drain(&scheduler, 3);
    let _ = scheduler.record_feedback(-45.0, 30);
    let _ = scheduler.record_feedback(-60.0, 10);

    // Five pairs at -60, then the first -45 pair followed by the shelf.
    let issued = drain(&scheduler, 13);
    assert_eq!(issued[10].kind(), ScanKind::Agc);
    assert_eq!(issued[11].kind(), ScanKind::Survey);
    assert_eq!(issued[12], request);
    assert_eq!(scheduler.stats().shelved, 1);
}

#[test]
fn test_shelved_requests_discarded_on_rediscovery() {
    let config = AcquisitionConfig {
        shelve_stale_targets: true,
        ..acquisition(&[-45.0, -60.0])
    };
    let scheduler = scheduler(&config);
    scheduler.dequeue();
    assert_eq!(
        scheduler.enqueue(targeted(Some(-45.0), 21)),
        EnqueueOutcome::Shelved
    );

    // No feedback ever arrives: 3 remaining discovery scans, 5 unplanned
    // pairs, then the restart.
    drain(&scheduler, 3 + 2 * MAX_UNPLANNED_ATTEMPTS as usize + 1);

    let discarded = scheduler.take_discarded();
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].candidate(), Some(CandidateId(21)));
    assert!(scheduler.take_discarded().is_empty());
    assert_eq!(scheduler.stats().discarded, 1);
}

#[test]
fn test_cycling_disabled_returns_agc_then_survey() {
    let config = AcquisitionConfig {
        cycling_enabled: false,
        ..acquisition(&[-45.0])
    };
    let scheduler = scheduler(&config);

    let pair = drain(&scheduler, 2);
    assert_eq!(pair[0].kind(), ScanKind::Agc);
    assert_eq!(pair[1].kind(), ScanKind::Survey);
    assert!(pair.iter().all(|r| r.cv().is_none()));
    assert_eq!(scheduler.phase(), SchedulerPhase::Fixed);
    assert_eq!(
        scheduler.record_feedback(-45.0, 3),
        FeedbackOutcome::UnknownCondition
    );
    // Stale checks are off without cycling.
    assert!(scheduler.enqueue(targeted(Some(-80.0), 1)).is_accepted());
}

#[test]
fn test_agc_disabled_issues_surveys_only() {
    let config = AcquisitionConfig {
        agc_enabled: false,
        ..acquisition(&[-45.0, -60.0])
    };
    let scheduler = scheduler(&config);
    let issued = drain(&scheduler, 2);
    assert!(issued.iter().all(|r| r.kind() == ScanKind::Survey));
    assert_eq!(survey_cvs(&issued), vec![-45.0, -60.0]);
}

#[test]
#[traced_test]
fn test_factory_fault_falls_back_to_default_scan() {
    let mut templates = ScanTemplates::default();
    templates.survey.first_mass = 1600.0;
    templates.survey.last_mass = 350.0;
    let scheduler = ScanScheduler::new(
        &acquisition(&[-45.0, -60.0]),
        Arc::new(TemplateScanFactory::new(templates)),
    );

    let request = scheduler.dequeue();
    assert_eq!(request.kind(), ScanKind::Agc);
    assert_eq!(request.cv(), None);
    assert_eq!(scheduler.pending_len(), 0);
    // Nothing was committed, so the next poll retries discovery.
    assert_eq!(scheduler.phase(), SchedulerPhase::Discovery);
    assert_eq!(scheduler.stats().fallbacks, 1);
    assert!(logs_contain("Scheduling fault"));
}

#[test]
fn test_concurrent_enqueue_and_dequeue() {
    let config = AcquisitionConfig {
        cycling_enabled: false,
        max_targeted_per_survey: 1_000,
        ..acquisition(&[])
    };
    let scheduler = Arc::new(scheduler(&config));

    std::thread::scope(|s| {
        let producer = Arc::clone(&scheduler);
        s.spawn(move || {
            for id in 0..500 {
                let _ = producer.enqueue(targeted(None, id));
            }
        });
        for _ in 0..3 {
            let consumer = Arc::clone(&scheduler);
            s.spawn(move || {
                for _ in 0..400 {
                    consumer.dequeue();
                }
            });
        }
    });

    let stats = scheduler.stats();
    // Fallback scans count as issued too.
    assert_eq!(stats.issued_agc + stats.issued_survey + stats.issued_targeted, 1_200);
}
