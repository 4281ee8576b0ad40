//! Determinism classifier: decides whether a call runs inline or becomes an
//! activity.

use crate::registry::Registry;
use crate::script::CallTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run in the workflow thread.
    Local,
    /// Send to the orchestrator as an activity.
    Activity,
}

/// Dispatcher state that forces inline execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// The entry module's top level is still executing.
    pub loading: bool,
    /// An activity body is running; activities never nest.
    pub in_activity: bool,
}

/// First matching rule wins.
pub fn classify(
    target: &CallTarget,
    flags: Flags,
    registry: &Registry,
    is_user_module: impl Fn(&str) -> bool,
) -> Decision {
    if flags.loading || flags.in_activity {
        return Decision::Local;
    }
    if target.activity {
        return Decision::Activity;
    }
    if registry.is_deterministic(target) || registry.is_no_activity(&target.qualified_name()) {
        return Decision::Local;
    }
    if is_user_module(&target.module) {
        return Decision::Local;
    }
    Decision::Activity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(module: &str, qualname: &str, receiver: Option<&str>, activity: bool) -> CallTarget {
        CallTarget {
            module: module.into(),
            qualname: qualname.into(),
            receiver_type: receiver.map(str::to_string),
            activity,
        }
    }

    fn decide(t: &CallTarget, flags: Flags, registry: &Registry) -> Decision {
        classify(t, flags, registry, |m| m == "workflow")
    }

    #[test]
    fn loading_and_nested_calls_stay_local() {
        let registry = Registry::new();
        let marked = target("workflow", "charge", None, true);
        let loading = Flags { loading: true, in_activity: false };
        let nested = Flags { loading: false, in_activity: true };
        assert_eq!(decide(&marked, loading, &registry), Decision::Local);
        assert_eq!(decide(&marked, nested, &registry), Decision::Local);
    }

    #[test]
    fn activity_marker_beats_everything_else() {
        let registry = Registry::with_defaults().unwrap();
        registry.register_no_activity("workflow.charge");
        let marked = target("workflow", "charge", None, true);
        assert_eq!(decide(&marked, Flags::default(), &registry), Decision::Activity);
    }

    #[test]
    fn registry_and_user_code_are_local() {
        let registry = Registry::with_defaults().unwrap();
        let cases = [
            target("json", "loads", None, false),
            target("builtins", "dict.get", Some("dict"), false),
            target("workflow", "helper", None, false),
            target("workflow", "Order.total", Some("workflow.Order"), false),
        ];
        for t in &cases {
            assert_eq!(decide(t, Flags::default(), &registry), Decision::Local, "{t:?}");
        }
    }

    #[test]
    fn everything_else_is_an_activity() {
        let registry = Registry::with_defaults().unwrap();
        for t in [
            target("http", "get", None, false),
            target("time", "time", None, false),
            target("random", "randint", None, false),
        ] {
            assert_eq!(decide(&t, Flags::default(), &registry), Decision::Activity, "{t:?}");
        }
    }

    #[test]
    fn no_activity_registration_covers_bound_methods() {
        let registry = Registry::with_defaults().unwrap();
        let method = target("vendor", "Client.fetch", Some("vendor.Client"), false);
        assert_eq!(decide(&method, Flags::default(), &registry), Decision::Activity);
        registry.register_no_activity("vendor.Client.fetch");
        assert_eq!(decide(&method, Flags::default(), &registry), Decision::Local);
    }
}
