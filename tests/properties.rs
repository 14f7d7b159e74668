use std::collections::BTreeMap;
use std::path::Path;

use polars::prelude::*;
use proptest::prelude::*;

use ahle_engine::attribution::{CauseProportions, ProportionKey};
use ahle_engine::differencer::LossComponent;
use ahle_engine::hierarchy::{roll_up, MeasureTable, RollupPlan};
use ahle_engine::moments::{difference, sum_present, FillPolicy, Moments};
use ahle_engine::segment::SegmentKey;

fn arb_moments() -> impl Strategy<Value = Moments> {
    (-1.0e6_f64..1.0e6, 0.0_f64..1.0e6).prop_map(|(m, v)| Moments::new(m, v))
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

// -- Fixed-factor scaling: Var(cX) = c²Var(X) --

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn scaling_squares_the_factor(x in arb_moments(), c in -100.0_f64..100.0) {
        let y = x.scale(c);
        prop_assert!(close(y.mean, c * x.mean));
        prop_assert!(close(y.variance, c * c * x.variance));
        prop_assert!(y.variance >= 0.0);
    }

    #[test]
    fn dividing_matches_scaling_by_reciprocal(x in arb_moments(), r in 0.01_f64..1000.0) {
        let y = x.divide(r).unwrap();
        prop_assert!(close(y.mean, x.mean / r));
        prop_assert!(close(y.stdev(), x.stdev() / r));
    }
}

// -- Independent sums and differences: variances add --

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn differences_add_variances(a in arb_moments(), b in arb_moments()) {
        let d = difference(Some(a), Some(b), FillPolicy::Propagate).unwrap();
        prop_assert!(close(d.mean, a.mean - b.mean));
        prop_assert!(close(d.variance, a.variance + b.variance));
    }

    #[test]
    fn absence_propagates(a in arb_moments()) {
        prop_assert_eq!(difference(Some(a), None, FillPolicy::Propagate), None);
        prop_assert_eq!(difference(None, Some(a), FillPolicy::Propagate), None);
        prop_assert!(difference(Some(a), None, FillPolicy::Zero).is_some());
    }

    #[test]
    fn count_aware_sum_ignores_absent(values in proptest::collection::vec(proptest::option::of(arb_moments()), 0..8)) {
        let present: Vec<Moments> = values.iter().flatten().copied().collect();
        match sum_present(values.iter().copied()) {
            None => prop_assert!(present.is_empty()),
            Some(s) => {
                let mean: f64 = present.iter().map(|m| m.mean).sum();
                let var: f64 = present.iter().map(|m| m.variance).sum();
                prop_assert!(close(s.mean, mean));
                prop_assert!(close(s.variance, var));
            }
        }
    }
}

// -- Roll-up: the overall row equals the sum of its leaves, whichever path --

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn overall_equals_sum_of_leaves(values in proptest::collection::vec(arb_moments(), 6)) {
        let groups = [
            "Adult Female", "Adult Male", "Juvenile Female",
            "Juvenile Male", "Neonatal Female", "Neonatal Male",
        ];
        let mut table: MeasureTable<&'static str> = BTreeMap::new();
        for (g, v) in groups.iter().zip(&values) {
            let key = SegmentKey::from_group("National", "Goat", "Pastoral", g, 2021);
            table.entry(key).or_default().insert("gross margin", *v);
        }

        let rolled = roll_up(&table, &RollupPlan::standard(None)).unwrap();
        let overall = SegmentKey::from_group("National", "Goat", "Pastoral", "Overall", 2021);
        let total = rolled[&overall]["gross margin"];
        let mean: f64 = values.iter().map(|m| m.mean).sum();
        let var: f64 = values.iter().map(|m| m.variance).sum();
        prop_assert!(close(total.mean, mean));
        prop_assert!(close(total.variance, var));

        // Combined sexes then all ages gives the same total as all leaves at once.
        let via_combined: f64 = ["Adult Combined", "Juvenile Combined", "Neonatal Combined"]
            .iter()
            .map(|g| rolled[&SegmentKey::from_group("National", "Goat", "Pastoral", g, 2021)]["gross margin"].mean)
            .sum();
        prop_assert!(close(via_combined, total.mean));

        // The species group rolls up from the production-system total.
        let group = SegmentKey::from_group("National", "All Small Ruminants", "Overall", "Overall", 2021);
        prop_assert!(close(rolled[&group]["gross margin"].mean, mean));
    }
}

// -- Per-cause means normalise to proportions summing to 1 --

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn cause_means_normalise(means in proptest::collection::vec(0.01_f64..1.0e5, 3)) {
        let causes = ["Infectious", "Non-infectious", "External"];
        let df = df!(
            "species" => ["Goat"; 3],
            "production_system" => ["Pastoral"; 3],
            "age_class" => ["Adult female"; 3],
            "ahle" => ["Mortality"; 3],
            "cause" => causes,
            "mean" => means.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        )
        .unwrap();

        let props = CauseProportions::from_frame(df, Path::new("memory.csv")).unwrap();
        let key = ProportionKey::new("Goat", "Pastoral", "Adult female", LossComponent::Mortality);
        let split = props.get(&key).unwrap();
        let sum: f64 = split.values().sum();
        prop_assert!((sum - 1.0).abs() < 1e-9);
        prop_assert!(split.values().all(|p| *p > 0.0));
    }
}
