//! The filter pipeline runtime (`spec.md` §4.8): ordered request filters, backend dispatch, then
//! response filters in reverse, each call wrapped in a panic barrier.

use std::panic::AssertUnwindSafe;

use skipper_core::context::Context;
use tracing::error;

/// How many of `route.filters`, from the front, actually ran their `request` callback. Needed so
/// the response phase replays exactly that prefix in reverse (`spec.md` §4.8 step 3, §8
/// property 5): a filter that never ran its request half never runs its response half either.
pub struct RequestPhaseOutcome {
    pub ran: usize,
}

/// Runs `route.filters[i].request(ctx)` in declaration order, stopping as soon as `ctx.served`
/// becomes true (`spec.md` §4.8 step 1). Each call is isolated by a panic barrier: a panic
/// aborts only that call, is logged, and the pipeline continues with the next filter
/// (`spec.md` §7 `FilterPanic`).
pub fn run_request_phase(ctx: &mut Context) -> RequestPhaseOutcome {
    let route = ctx.route.clone();
    let mut ran = 0;
    for f in route.filters.iter() {
        ran += 1;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| f.instance.request(ctx)));
        if let Err(payload) = outcome {
            error!(filter = %f.name, route = %route.id, panic = %panic_message(&payload), "filter panicked during request phase");
        }
        if ctx.served {
            break;
        }
    }
    RequestPhaseOutcome { ran }
}

/// Runs the response half of exactly the filters that ran their request half, in reverse order
/// (`spec.md` §4.8 step 3, §8 property 5). `run_on_cancel` filters out skip their response call if
/// `skip_for_cancel` is set and the filter is not marked `RUN_ON_CANCEL_KEY` (`spec.md` §5
/// cancellation policy).
pub fn run_response_phase(ctx: &mut Context, ran: usize, skip_for_cancel: bool) {
    ctx.snapshot_response();
    let route = ctx.route.clone();
    for f in route.filters[..ran].iter().rev() {
        if skip_for_cancel && !ctx.state_bag.contains(skipper_core::context::RUN_ON_CANCEL_KEY) {
            continue;
        }
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| f.instance.response(ctx)));
        if let Err(payload) = outcome {
            error!(filter = %f.name, route = %route.id, panic = %panic_message(&payload), "filter panicked during response phase");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skipper_core::body;
    use skipper_core::filter::Filter;
    use skipper_core::route::{Backend, FilterInstance, PathMatcher, Route};
    use skipper_core::value::RouteId;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct Recording {
        name: &'static str,
        order: Arc<Mutex<Vec<String>>>,
        serve_on_request: bool,
    }

    impl Filter for Recording {
        fn request(&self, ctx: &mut Context) {
            self.order.lock().unwrap().push(format!("{}.request", self.name));
            if self.serve_on_request {
                ctx.served = true;
                ctx.response = Some(http::Response::builder().status(200).body(body::empty()).unwrap());
            }
        }

        fn response(&self, _ctx: &mut Context) {
            self.order.lock().unwrap().push(format!("{}.response", self.name));
        }
    }

    fn make_route(filters: Vec<FilterInstance>) -> Arc<Route> {
        Arc::new(Route {
            id: RouteId::from("r"),
            path: PathMatcher::Exact("/x".to_string()),
            method: None,
            validators: Vec::new(),
            filters,
            backend: Backend::Shunt,
            specificity: 0,
            insertion_order: 0,
        })
    }

    fn make_ctx(route: Arc<Route>) -> Context {
        let req = http::Request::builder().uri("/x").body(body::empty()).unwrap();
        Context::new(req, route, Default::default(), None, false, None)
    }

    #[test]
    fn full_chain_runs_request_then_reverse_response() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let filters = vec!["f1", "f2", "f3"]
            .into_iter()
            .map(|n| FilterInstance {
                name: Arc::from(n),
                instance: Arc::new(Recording {
                    name: n,
                    order: order.clone(),
                    serve_on_request: false,
                }) as Arc<dyn Filter>,
            })
            .collect();
        let route = make_route(filters);
        let mut ctx = make_ctx(route);
        let outcome = run_request_phase(&mut ctx);
        assert_eq!(outcome.ran, 3);
        run_response_phase(&mut ctx, outcome.ran, false);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["f1.request", "f2.request", "f3.request", "f3.response", "f2.response", "f1.response"]
        );
    }

    #[test]
    fn served_short_circuits_remaining_request_filters() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let filters = vec![
            FilterInstance {
                name: Arc::from("f1"),
                instance: Arc::new(Recording { name: "f1", order: order.clone(), serve_on_request: false }) as Arc<dyn Filter>,
            },
            FilterInstance {
                name: Arc::from("f2"),
                instance: Arc::new(Recording { name: "f2", order: order.clone(), serve_on_request: true }) as Arc<dyn Filter>,
            },
            FilterInstance {
                name: Arc::from("f3"),
                instance: Arc::new(Recording { name: "f3", order: order.clone(), serve_on_request: false }) as Arc<dyn Filter>,
            },
        ];
        let route = make_route(filters);
        let mut ctx = make_ctx(route);
        let outcome = run_request_phase(&mut ctx);
        assert_eq!(outcome.ran, 2);
        assert!(ctx.served);
        run_response_phase(&mut ctx, outcome.ran, false);
        assert_eq!(*order.lock().unwrap(), vec!["f1.request", "f2.request", "f2.response", "f1.response"]);
    }

    #[derive(Debug)]
    struct Panicking;

    impl Filter for Panicking {
        fn request(&self, _ctx: &mut Context) {
            panic!("boom");
        }
    }

    #[test]
    fn a_panicking_filter_does_not_abort_the_pipeline() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let filters = vec![
            FilterInstance {
                name: Arc::from("panics"),
                instance: Arc::new(Panicking) as Arc<dyn Filter>,
            },
            FilterInstance {
                name: Arc::from("f2"),
                instance: Arc::new(Recording { name: "f2", order: order.clone(), serve_on_request: false }) as Arc<dyn Filter>,
            },
        ];
        let route = make_route(filters);
        let mut ctx = make_ctx(route);
        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let outcome = run_request_phase(&mut ctx);
        std::panic::set_hook(prev_hook);
        assert_eq!(outcome.ran, 2);
        assert_eq!(*order.lock().unwrap(), vec!["f2.request"]);
    }
}
