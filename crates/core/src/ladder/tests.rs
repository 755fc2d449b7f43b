use super::*;
use proptest::prelude::*;

fn leaf(name: &str, threshold: i64, parent: Option<&str>) -> RankSpec {
    RankSpec {
        name: name.to_string(),
        threshold_points: threshold,
        parent: parent.map(str::to_string),
        kind: RankKind::Leaf,
        manual_only: false,
    }
}

fn category(name: &str) -> RankSpec {
    RankSpec {
        name: name.to_string(),
        threshold_points: 0,
        parent: None,
        kind: RankKind::Category,
        manual_only: false,
    }
}

fn volunteer_ladder() -> RankLadder {
    let mut capstone = leaf("Ambassador", 10_000, None);
    capstone.manual_only = true;
    RankLadder::try_new(vec![
        leaf("Newcomer", 0, None),
        category("Member"),
        leaf("Member I", 100, Some("Member")),
        leaf("Member II", 500, Some("Member")),
        category("Lead"),
        leaf("Lead I", 2_000, Some("Lead")),
        leaf("Lead II", 5_000, Some("Lead")),
        leaf("Mentor", 5_000, Some("Lead")),
        capstone,
    ])
    .expect("volunteer ladder is valid")
}

fn resolved_name(ladder: &RankLadder, points: i64) -> Option<&str> {
    ladder.resolve(points).map(|rank| rank.name.as_str())
}

#[test]
fn resolve_picks_highest_threshold_not_above_points() {
    let ladder = volunteer_ladder();
    assert_eq!(resolved_name(&ladder, 0), Some("Newcomer"));
    assert_eq!(resolved_name(&ladder, 99), Some("Newcomer"));
    assert_eq!(resolved_name(&ladder, 100), Some("Member I"));
    assert_eq!(resolved_name(&ladder, 1_999), Some("Member II"));
    assert_eq!(resolved_name(&ladder, 2_000), Some("Lead I"));
}

#[test]
fn resolve_breaks_ties_by_later_sequence() {
    let ladder = volunteer_ladder();
    assert_eq!(resolved_name(&ladder, 5_000), Some("Mentor"));
    assert_eq!(resolved_name(&ladder, 9_999), Some("Mentor"));
}

#[test]
fn resolve_never_returns_categories_or_capstones() {
    let ladder = volunteer_ladder();
    assert_eq!(resolved_name(&ladder, 1_000_000), Some("Mentor"));
    for points in [0, 100, 500, 2_000, 5_000, 10_000, i64::MAX] {
        let rank = ladder.resolve(points).expect("ladder has a zero rank");
        assert_eq!(rank.kind, RankKind::Leaf);
        assert!(!rank.manual_only);
    }
}

#[test]
fn resolve_without_zero_threshold_rank_yields_none_below_first_threshold() {
    let ladder = RankLadder::try_new(vec![leaf("Bronze", 10, None), leaf("Silver", 20, None)])
        .expect("valid ladder");
    assert_eq!(resolved_name(&ladder, 0), None);
    assert_eq!(resolved_name(&ladder, 9), None);
    assert_eq!(resolved_name(&ladder, 10), Some("Bronze"));
    assert_eq!(resolved_name(&ladder, -5), None);
}

#[test]
fn assignable_excludes_categories_in_canonical_order() {
    let ladder = volunteer_ladder();
    let names: Vec<&str> = ladder.assignable().map(|rank| rank.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Newcomer",
            "Member I",
            "Member II",
            "Lead I",
            "Lead II",
            "Mentor",
            "Ambassador"
        ]
    );
}

#[test]
fn next_rank_skips_categories_and_capstones() {
    let ladder = volunteer_ladder();
    let next = |current: Option<&str>| ladder.next_rank(current).map(|rank| rank.name.clone());
    assert_eq!(next(None).as_deref(), Some("Newcomer"));
    assert_eq!(next(Some("Newcomer")).as_deref(), Some("Member I"));
    assert_eq!(next(Some("Member II")).as_deref(), Some("Lead I"));
    assert_eq!(next(Some("Lead II")).as_deref(), Some("Mentor"));
    assert_eq!(next(Some("Mentor")), None);
    assert_eq!(next(Some("Ambassador")), None);
    assert_eq!(next(Some("Nope")), None);
    assert_eq!(ladder.points_to_next(40, Some("Newcomer")), Some(60));
    assert_eq!(ladder.points_to_next(150, Some("Newcomer")), Some(0));
    assert_eq!(ladder.points_to_next(7_000, Some("Mentor")), None);
}

#[test]
fn reresolve_keeps_capstone_while_threshold_holds() {
    let ladder = volunteer_ladder();
    let kept = ladder.reresolve(12_000, Some("Ambassador")).expect("rank");
    assert_eq!(kept.name, "Ambassador");
    let dropped = ladder.reresolve(9_000, Some("Ambassador")).expect("rank");
    assert_eq!(dropped.name, "Mentor");
    let plain = ladder.reresolve(600, Some("Newcomer")).expect("rank");
    assert_eq!(plain.name, "Member II");
}

#[test]
fn try_new_rejects_invalid_ladders() {
    assert_eq!(RankLadder::try_new(Vec::new()).unwrap_err(), LadderError::Empty);
    assert!(matches!(
        RankLadder::try_new(vec![leaf("A", 0, None), leaf("A", 5, None)]).unwrap_err(),
        LadderError::DuplicateName { .. }
    ));
    assert!(matches!(
        RankLadder::try_new(vec![leaf("A", -1, None)]).unwrap_err(),
        LadderError::NegativeThreshold { .. }
    ));
    assert!(matches!(
        RankLadder::try_new(vec![leaf("A", 0, Some("Ghost"))]).unwrap_err(),
        LadderError::UnknownParent { .. }
    ));
    assert!(matches!(
        RankLadder::try_new(vec![leaf("A", 0, None), leaf("B", 5, Some("A"))]).unwrap_err(),
        LadderError::ParentNotCategory { .. }
    ));
    assert!(matches!(
        RankLadder::try_new(vec![leaf("Hi", 50, None), leaf("Lo", 10, None)]).unwrap_err(),
        LadderError::ThresholdOutOfOrder { .. }
    ));
    assert!(matches!(
        RankLadder::try_new(vec![leaf("  ", 0, None)]).unwrap_err(),
        LadderError::InvalidName { .. }
    ));

    let mut a = category("A");
    a.parent = Some("B".to_string());
    let mut b = category("B");
    b.parent = Some("A".to_string());
    assert!(matches!(
        RankLadder::try_new(vec![a, b]).unwrap_err(),
        LadderError::ParentCycle { .. }
    ));
}

#[test]
fn yaml_config_round_trips_through_ladder() {
    let raw = r#"
ranks:
  - name: Newcomer
  - name: Member
    kind: category
  - name: Member I
    threshold_points: 100
    parent: Member
  - name: Ambassador
    threshold_points: 900
    manual_only: true
"#;
    let ladder = RankLadder::from_yaml_str(raw).expect("yaml ladder");
    assert_eq!(ladder.ranks().len(), 4);
    assert_eq!(ladder.get("Member").map(|rank| rank.kind), Some(RankKind::Category));
    assert_eq!(ladder.position("Member I"), Some(2));

    let rebuilt = RankLadder::from_config(ladder.to_config()).expect("rebuild");
    assert_eq!(rebuilt, ladder);

    let err = RankLadder::from_yaml_str("ranks: [").unwrap_err();
    assert!(matches!(err, LadderError::Parse { .. }));
}

fn generated_ladder() -> impl Strategy<Value = RankLadder> {
    prop::collection::vec((0i64..200, any::<bool>()), 1..12).prop_map(|steps| {
        let mut threshold = 0i64;
        let specs = steps
            .into_iter()
            .enumerate()
            .map(|(i, (step, is_category))| {
                threshold += step;
                RankSpec {
                    name: format!("R{i}"),
                    threshold_points: threshold,
                    parent: None,
                    kind: if is_category {
                        RankKind::Category
                    } else {
                        RankKind::Leaf
                    },
                    manual_only: false,
                }
            })
            .collect();
        RankLadder::try_new(specs).expect("generated ladder is valid")
    })
}

proptest! {
    #[test]
    fn resolution_is_monotonic_in_points(
        ladder in generated_ladder(),
        a in 0i64..3_000,
        b in 0i64..3_000,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let lo_pos = ladder.resolve(lo).map(|rank| rank.sequence);
        let hi_pos = ladder.resolve(hi).map(|rank| rank.sequence);
        prop_assert!(lo_pos <= hi_pos);
    }

    #[test]
    fn resolution_matches_rule_and_is_deterministic(
        ladder in generated_ladder(),
        points in 0i64..3_000,
    ) {
        let first = ladder.resolve(points).cloned();
        let second = ladder.resolve(points).cloned();
        prop_assert_eq!(&first, &second);

        let best = ladder
            .assignable()
            .filter(|rank| rank.threshold_points <= points)
            .map(|rank| (rank.threshold_points, rank.sequence))
            .max();
        prop_assert_eq!(first.map(|rank| (rank.threshold_points, rank.sequence)), best);
    }
}
