use super::validators::{email, required};
use super::*;
use futures::executor::block_on;
use futures::join;
use futures_timer::Delay;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Directory {
    taken: Vec<&'static str>,
    latency: Vec<(&'static str, u64)>,
    unavailable: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Directory {
    fn taken(mut self, email: &'static str) -> Self {
        self.taken.push(email);
        self
    }

    fn latency(mut self, email: &'static str, millis: u64) -> Self {
        self.latency.push((email, millis));
        self
    }

    fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn latency_for(&self, email: &str) -> u64 {
        self.latency
            .iter()
            .find_map(|(candidate, millis)| (*candidate == email).then_some(*millis))
            .unwrap_or(5)
    }
}

impl AsyncFieldCheck for Directory {
    type Fut<'a>
        = BoxedCheckFuture<'a>
    where
        Self: 'a;

    fn check<'a>(&'a self, value: &'a Value, _values: &'a ValueMap) -> Self::Fut<'a> {
        Box::pin(async move {
            let email = value.as_text().unwrap_or_default().to_string();
            self.calls.lock().expect("calls lock").push(email.clone());
            Delay::new(Duration::from_millis(self.latency_for(&email))).await;
            if self.unavailable {
                return Err(CheckFailure::new("directory unavailable"));
            }
            if self.taken.contains(&email.as_str()) {
                Ok(CheckVerdict::Rejected(FieldError::new(
                    DUPLICATE,
                    "Email already in use",
                )))
            } else {
                Ok(CheckVerdict::Accepted)
            }
        })
    }
}

fn signup_form(directory: Directory, debounce_ms: u64) -> FormController {
    let config = FormConfig::builder("signup")
        .options(FormOptions {
            async_debounce: Duration::from_millis(debounce_ms),
            ..FormOptions::default()
        })
        .field(
            "email",
            FieldSpec::new("")
                .normalize(normalizers::trim())
                .normalize(normalizers::lowercase())
                .validator(required("Email is required"))
                .validator(email("Enter a valid email"))
                .async_check(directory),
        )
        .field(
            "password",
            FieldSpec::new("hunter2000").validator(required("Password is required")),
        )
        .build()
        .expect("signup config");
    FormController::new(config)
}

fn submit(controller: &FormController) -> SubmitOutcome<String> {
    controller
        .handle_submit(|_values| Ok::<(), String>(()))
        .expect("submit")
}

#[test]
fn taken_email_moves_from_idle_through_checking_to_rejected() {
    let directory = Directory::default()
        .taken("x@y.com")
        .latency("x@y.com", 20);
    let controller = signup_form(directory.clone(), 30);
    assert_eq!(
        controller
            .snapshot()
            .expect("snapshot")
            .async_status("email"),
        Some(AsyncCheckStatus::Idle)
    );

    let (outcome, mid_flight) = block_on(async {
        join!(
            controller.handle_change_async("email", " X@Y.com "),
            async {
                Delay::new(Duration::from_millis(10)).await;
                controller.snapshot().expect("mid-flight snapshot")
            }
        )
    });

    assert_eq!(
        mid_flight.async_status("email"),
        Some(AsyncCheckStatus::Checking)
    );
    assert!(!mid_flight.can_submit());
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Rejected);
    assert_eq!(directory.calls(), vec!["x@y.com".to_string()]);

    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.async_status("email"), Some(AsyncCheckStatus::Rejected));
    assert_eq!(
        snapshot.async_checks.get("email").and_then(|state| state.query.clone()),
        Some(Value::text("x@y.com"))
    );
    assert_eq!(snapshot.error("email").map(FieldError::code), Some(DUPLICATE));
    assert!(!snapshot.can_submit());
}

#[test]
fn rejected_check_blocks_submit_and_keeps_its_error() {
    let directory = Directory::default().taken("x@y.com");
    let controller = signup_form(directory, 0);
    let outcome = block_on(controller.handle_change_async("email", "x@y.com"));
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Rejected);

    let handler_calls = AtomicUsize::new(0);
    let outcome = controller
        .handle_submit(|_values| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .expect("submit");

    assert_eq!(
        outcome,
        SubmitOutcome::Blocked(SubmitBlock::Rejected(FieldKey::new("email")))
    );
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.error("email").map(FieldError::code), Some(DUPLICATE));
    assert!(!snapshot.is_submitting);
    assert_eq!(snapshot.submit_state, SubmitState::Failed);
}

#[test]
fn debounced_burst_checks_only_the_last_value() {
    let directory = Directory::default();
    let controller = signup_form(directory.clone(), 40);

    let (first, second, third) = block_on(async {
        join!(
            controller.handle_change_async("email", "a@example.com"),
            async {
                Delay::new(Duration::from_millis(5)).await;
                controller
                    .handle_change_async("email", "b@example.com")
                    .await
            },
            async {
                Delay::new(Duration::from_millis(10)).await;
                controller
                    .handle_change_async("email", "c@example.com")
                    .await
            }
        )
    });

    assert_eq!(first.expect("first change"), AsyncCheckOutcome::Superseded);
    assert_eq!(second.expect("second change"), AsyncCheckOutcome::Superseded);
    assert_eq!(third.expect("third change"), AsyncCheckOutcome::Accepted);
    assert_eq!(directory.calls(), vec!["c@example.com".to_string()]);
}

#[test]
fn late_response_for_an_old_value_is_discarded() {
    let directory = Directory::default()
        .taken("slow@example.com")
        .latency("slow@example.com", 80)
        .latency("fast@example.com", 5);
    let controller = signup_form(directory.clone(), 0);

    let (slow, fast) = block_on(async {
        join!(
            controller.handle_change_async("email", "slow@example.com"),
            async {
                Delay::new(Duration::from_millis(20)).await;
                controller
                    .handle_change_async("email", "fast@example.com")
                    .await
            }
        )
    });

    assert_eq!(slow.expect("slow change"), AsyncCheckOutcome::Stale);
    assert_eq!(fast.expect("fast change"), AsyncCheckOutcome::Accepted);
    assert_eq!(directory.calls().len(), 2);

    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.values.text("email"), Some("fast@example.com"));
    assert_eq!(snapshot.async_status("email"), Some(AsyncCheckStatus::Accepted));
    assert_eq!(snapshot.error("email"), None);
    assert!(snapshot.can_submit());
}

#[test]
fn pending_check_blocks_submit_until_it_resolves() {
    let controller = signup_form(Directory::default(), 50);

    let (outcome, blocked) = block_on(async {
        join!(
            controller.handle_change_async("email", "ok@example.com"),
            async {
                Delay::new(Duration::from_millis(10)).await;
                submit(&controller)
            }
        )
    });

    assert_eq!(
        blocked,
        SubmitOutcome::Blocked(SubmitBlock::PendingCheck(FieldKey::new("email")))
    );
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Accepted);
    assert_eq!(submit(&controller), SubmitOutcome::Submitted);
}

#[test]
fn locally_invalid_value_skips_the_remote_call() {
    let directory = Directory::default();
    let controller = signup_form(directory.clone(), 0);

    let outcome = block_on(controller.handle_change_async("email", "not-an-email"));
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::LocallyInvalid);
    assert!(directory.calls().is_empty());
    assert_eq!(
        controller
            .snapshot()
            .expect("snapshot")
            .async_status("email"),
        Some(AsyncCheckStatus::Idle)
    );
}

#[test]
fn failed_remote_call_leaves_field_idle_and_submittable() {
    let directory = Directory::default().unavailable();
    let controller = signup_form(directory.clone(), 0);

    let outcome = block_on(controller.handle_change_async("email", "ok@example.com"));
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Failed);
    assert_eq!(directory.calls().len(), 1);

    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.async_status("email"), Some(AsyncCheckStatus::Idle));
    assert_eq!(snapshot.error("email"), None);
    assert_eq!(submit(&controller), SubmitOutcome::Submitted);
}

#[test]
fn new_value_clears_previous_rejection_while_it_is_checked() {
    let directory = Directory::default()
        .taken("x@y.com")
        .latency("new@y.com", 30);
    let controller = signup_form(directory, 0);
    let outcome = block_on(controller.handle_change_async("email", "x@y.com"));
    assert_eq!(outcome.expect("first change"), AsyncCheckOutcome::Rejected);

    let (outcome, mid_flight) = block_on(async {
        join!(
            controller.handle_change_async("email", "new@y.com"),
            async {
                Delay::new(Duration::from_millis(10)).await;
                controller.snapshot().expect("mid-flight snapshot")
            }
        )
    });

    assert_eq!(mid_flight.error("email"), None);
    assert_eq!(
        mid_flight.async_status("email"),
        Some(AsyncCheckStatus::Checking)
    );
    assert_eq!(outcome.expect("second change"), AsyncCheckOutcome::Accepted);
    assert!(controller.snapshot().expect("snapshot").can_submit());
}

#[test]
fn reset_discards_in_flight_check() {
    let directory = Directory::default()
        .taken("x@y.com")
        .latency("x@y.com", 40);
    let controller = signup_form(directory, 0);

    let (outcome, ()) = block_on(async {
        join!(
            controller.handle_change_async("email", "x@y.com"),
            async {
                Delay::new(Duration::from_millis(10)).await;
                controller.reset_form().expect("reset");
            }
        )
    });

    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Stale);
    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.async_status("email"), Some(AsyncCheckStatus::Idle));
    assert!(snapshot.errors.is_empty());
    assert_eq!(snapshot.values.text("email"), Some(""));
}

#[test]
fn duplicate_check_adapts_an_existence_lookup() {
    let lookups = Arc::new(AtomicUsize::new(0));
    let check = {
        let lookups = lookups.clone();
        duplicate_check("Username is taken", move |candidate: String| {
            lookups.fetch_add(1, Ordering::SeqCst);
            async move {
                Delay::new(Duration::from_millis(5)).await;
                Ok::<bool, CheckFailure>(candidate == "calm")
            }
        })
    };
    let config = FormConfig::builder("username")
        .field(
            "username",
            FieldSpec::new("")
                .validator(required("Pick a username"))
                .async_check_with_debounce(Duration::ZERO, check),
        )
        .build()
        .expect("username config");
    let controller = FormController::new(config);

    let taken = block_on(controller.handle_change_async("username", "calm"));
    assert_eq!(taken.expect("taken change"), AsyncCheckOutcome::Rejected);
    assert_eq!(
        controller
            .snapshot()
            .expect("snapshot")
            .error("username")
            .map(FieldError::message),
        Some("Username is taken")
    );

    let free = block_on(controller.handle_change_async("username", "quiet"));
    assert_eq!(free.expect("free change"), AsyncCheckOutcome::Accepted);
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
    assert_eq!(
        block_on(controller.check_field_async("password")).err(),
        Some(FormError::UnknownField("password".to_string()))
    );
}

#[test]
fn async_submit_handler_keeps_form_submitting_until_it_settles() {
    let controller = signup_form(Directory::default(), 0);
    let outcome = block_on(controller.handle_change_async("email", "ok@example.com"));
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Accepted);

    let (outcome, (observed, second)) = block_on(async {
        join!(
            controller.handle_submit_async(|values| async move {
                Delay::new(Duration::from_millis(30)).await;
                assert_eq!(values.text("email"), Some("ok@example.com"));
                Ok::<(), String>(())
            }),
            async {
                Delay::new(Duration::from_millis(10)).await;
                (
                    controller.is_submitting().expect("is submitting"),
                    submit(&controller),
                )
            }
        )
    });

    assert!(observed);
    assert_eq!(second, SubmitOutcome::AlreadySubmitting);
    assert_eq!(outcome.expect("async submit"), SubmitOutcome::Submitted);
    assert!(!controller.is_submitting().expect("is submitting"));
}

/// Answers calls in order: `(latency_ms, taken)` per call.
struct ScriptedDirectory {
    replies: Vec<(u64, bool)>,
    calls: AtomicUsize,
}

impl AsyncFieldCheck for ScriptedDirectory {
    type Fut<'a>
        = BoxedCheckFuture<'a>
    where
        Self: 'a;

    fn check<'a>(&'a self, _value: &'a Value, _values: &'a ValueMap) -> Self::Fut<'a> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let (latency, taken) = self.replies.get(call).copied().unwrap_or((5, false));
        Box::pin(async move {
            Delay::new(Duration::from_millis(latency)).await;
            if taken {
                Ok(CheckVerdict::Rejected(FieldError::new(
                    DUPLICATE,
                    "Email already in use",
                )))
            } else {
                Ok(CheckVerdict::Accepted)
            }
        })
    }
}

#[test]
fn older_check_for_a_returning_value_never_overrides_the_newest() {
    let directory = ScriptedDirectory {
        replies: vec![(40, false), (5, false), (80, true)],
        calls: AtomicUsize::new(0),
    };
    let config = FormConfig::builder("signup")
        .options(FormOptions {
            async_debounce: Duration::ZERO,
            ..FormOptions::default()
        })
        .field(
            "email",
            FieldSpec::new("")
                .validator(email("Enter a valid email"))
                .async_check(directory),
        )
        .build()
        .expect("signup config");
    let controller = FormController::new(config);

    let (first, other, newest) = block_on(async {
        join!(
            controller.handle_change_async("email", "a@example.com"),
            async {
                Delay::new(Duration::from_millis(10)).await;
                controller
                    .handle_change_async("email", "b@example.com")
                    .await
            },
            async {
                Delay::new(Duration::from_millis(20)).await;
                controller
                    .handle_change_async("email", "a@example.com")
                    .await
            }
        )
    });

    assert_eq!(first.expect("first change"), AsyncCheckOutcome::Stale);
    assert_eq!(other.expect("other change"), AsyncCheckOutcome::Accepted);
    assert_eq!(newest.expect("newest change"), AsyncCheckOutcome::Rejected);

    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.async_status("email"), Some(AsyncCheckStatus::Rejected));
    assert_eq!(snapshot.error("email").map(FieldError::code), Some(DUPLICATE));
    assert!(!snapshot.can_submit());
}

#[test]
fn dropping_an_async_submit_midway_releases_the_form() {
    let controller = signup_form(Directory::default(), 0);
    let outcome = block_on(controller.handle_change_async("email", "ok@example.com"));
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Accepted);

    block_on(async {
        let mut pending = Box::pin(controller.handle_submit_async(|_values| async {
            Delay::new(Duration::from_millis(50)).await;
            Ok::<(), String>(())
        }));
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert!(controller.is_submitting().expect("is submitting"));
    });

    let snapshot = controller.snapshot().expect("snapshot");
    assert!(!snapshot.is_submitting);
    assert_eq!(snapshot.submit_state, SubmitState::Idle);
    assert_eq!(submit(&controller), SubmitOutcome::Submitted);
}

#[test]
fn duplicate_check_on_a_non_text_value_fails_without_a_lookup() {
    let lookups = Arc::new(AtomicUsize::new(0));
    let check = {
        let lookups = lookups.clone();
        duplicate_check("Already subscribed", move |_candidate: String| {
            lookups.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<bool, CheckFailure>(false) }
        })
    };
    let config = FormConfig::builder("newsletter")
        .field(
            "subscribed",
            FieldSpec::new(false).async_check_with_debounce(Duration::ZERO, check),
        )
        .build()
        .expect("newsletter config");
    let controller = FormController::new(config);

    let outcome = block_on(controller.handle_change_async("subscribed", true));
    assert_eq!(outcome.expect("async change"), AsyncCheckOutcome::Failed);
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
    assert_eq!(
        controller
            .snapshot()
            .expect("snapshot")
            .async_status("subscribed"),
        Some(AsyncCheckStatus::Idle)
    );
}
