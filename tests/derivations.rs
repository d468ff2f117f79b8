//! Structural derivations: order duals, additive twins, products, quotients,
//! pullbacks, plus loading catalogs and configuration from disk.

use structura::catalog::Catalog;
use structura::config::{RegistryConfig, TwinDictionary, TwinPair};
use structura::error::{OpError, ResolutionError};
use structura::record::Derivation;
use structura::registry::Registry;
use structura::rules::{CompositionRule, RuleKind};
use structura::samples;
use structura::subject::SubjectType;
use structura::value::Value;

fn standard_registry() -> Registry {
    let registry = Registry::new();
    Catalog::standard().unwrap().apply(&registry).unwrap();
    registry
}

fn ints(range: std::ops::RangeInclusive<i64>) -> Vec<Value> {
    range.map(Value::Int).collect()
}

#[test]
fn order_dual_mirrors_lattice_operations() {
    let registry = standard_registry();
    let int = samples::register_integers(&registry).unwrap();

    let dual = registry.derive_order_dual(&int).unwrap();
    assert_eq!(dual.subject(), &int.clone().order_dual());

    let lattice = dual.get(&"Lattice".into()).unwrap();
    assert_eq!(
        lattice.call("sup", &[Value::Int(1), Value::Int(4)]).unwrap(),
        Value::Int(1)
    );
    assert_eq!(
        lattice.call("le", &[Value::Int(4), Value::Int(1)]).unwrap(),
        Value::Bool(true)
    );

    // Group structure passes through unchanged.
    let group = dual.get(&"CommGroup".into()).unwrap();
    assert_eq!(
        group.call("mul", &[Value::Int(2), Value::Int(3)]).unwrap(),
        Value::Int(5)
    );
}

#[test]
fn order_dual_twice_is_the_original_set() {
    let registry = standard_registry();
    let int = samples::register_integers(&registry).unwrap();

    let once = registry.derive_order_dual(&int).unwrap();
    let twice = registry.derive_order_dual(once.subject()).unwrap();
    let original = registry.held_capabilities(&int).unwrap();

    assert_eq!(twice.subject(), &int);
    assert!(twice.agrees_with(&original, &ints(-2..=2)));
}

#[test]
fn order_dual_swaps_bounds() {
    let registry = standard_registry();
    let b = SubjectType::named("Bool");
    registry
        .register_primitive("Lattice", &b, samples::boolean_lattice())
        .unwrap();
    registry
        .register_primitive("BoundedOrder", &b, samples::boolean_lattice())
        .unwrap();

    let dual = registry
        .resolve("OrderTop", &b.clone().order_dual())
        .unwrap();
    assert_eq!(dual.call("top", &[]).unwrap(), Value::Bool(false));
    match dual.derivation() {
        Derivation::Rule { kind, premises, .. } => {
            assert_eq!(*kind, RuleKind::OrderDual);
            assert_eq!(premises[0].capability.as_str(), "OrderBot");
        }
        Derivation::Primitive => panic!("expected a derived record"),
    }
}

#[test]
fn nothing_to_mirror_without_order_structure() {
    let registry = standard_registry();
    let z = SubjectType::named("Z7");
    registry
        .register_primitive("CommGroup", &z, samples::cyclic_group(7))
        .unwrap();

    let err = registry.derive_order_dual(&z).unwrap_err();
    assert!(matches!(err, ResolutionError::NothingToMirror { .. }));

    let empty = SubjectType::named("Empty");
    let err = registry.derive_additive_twin(&empty).unwrap_err();
    assert!(matches!(err, ResolutionError::NothingToMirror { .. }));
}

#[test]
fn additive_twin_renames_operations() {
    let registry = standard_registry();
    let z5 = samples::register_cyclic(&registry, 5).unwrap();

    let twin = registry.derive_additive_twin(&z5).unwrap();
    assert_eq!(twin.subject(), &z5.clone().additive());
    assert!(!twin.contains(&"CommGroup".into()));

    let group = twin.get(&"AddCommGroup".into()).unwrap();
    let names: Vec<&str> = group.operation_names().collect();
    assert_eq!(names, vec!["add", "neg", "zero"]);
    assert_eq!(group.call("neg", &[Value::Int(2)]).unwrap(), Value::Int(3));

    // Neutral capabilities keep their names.
    let order = twin.get(&"PartialOrder".into()).unwrap();
    assert_eq!(
        order.call("le", &[Value::Int(1), Value::Int(1)]).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn additive_twin_is_an_involution() {
    let registry = standard_registry();
    let z5 = samples::register_cyclic(&registry, 5).unwrap();

    let once = registry.derive_additive_twin(&z5).unwrap();
    let twice = registry.derive_additive_twin(once.subject()).unwrap();
    let original = registry.held_capabilities(&z5).unwrap();

    assert_eq!(twice.subject(), &z5);
    assert!(twice.agrees_with(&original, &ints(0..=4)));
}

#[test]
fn dual_and_twin_compose() {
    let registry = standard_registry();
    let z5 = samples::register_cyclic(&registry, 5).unwrap();
    let subject = z5.order_dual().additive();

    let group = registry.resolve("OrderedAddCommGroup", &subject).unwrap();
    assert_eq!(
        group.call("add", &[Value::Int(3), Value::Int(4)]).unwrap(),
        Value::Int(2)
    );
    assert_eq!(group.depth(), 3);
}

#[test]
fn products_are_pointwise() {
    let registry = standard_registry();
    let int = samples::register_integers(&registry).unwrap();
    let plane = SubjectType::product(int.clone(), int);

    let lattice = registry.resolve("LatticeCommGroup", &plane).unwrap();
    let p = |a, b| Value::pair(Value::Int(a), Value::Int(b));
    assert_eq!(
        lattice.call("sup", &[p(1, 5), p(3, 2)]).unwrap(),
        p(3, 5)
    );
    assert_eq!(
        lattice.call("le", &[p(1, 5), p(3, 2)]).unwrap(),
        Value::Bool(false)
    );
    assert_eq!(lattice.call("one", &[]).unwrap(), p(0, 0));
    assert!(matches!(
        lattice.call("inv", &[Value::Int(1)]),
        Err(OpError::TypeMismatch { .. })
    ));
}

#[test]
fn quotients_canonicalize() {
    let registry = standard_registry();
    let int = samples::register_integers(&registry).unwrap();
    let congruence = samples::residue_congruence(5);
    let z5 = congruence.subject();
    registry
        .register_rule(CompositionRule::quotient(congruence).only(["CommGroup"]))
        .unwrap();

    let group = registry.resolve("CommGroup", &z5).unwrap();
    assert_eq!(
        group.call("mul", &[Value::Int(3), Value::Int(4)]).unwrap(),
        Value::Int(2)
    );
    assert_eq!(group.call("inv", &[Value::Int(2)]).unwrap(), Value::Int(3));
    assert_eq!(group.call("inv", &[Value::Int(-8)]).unwrap(), Value::Int(3));

    // Restricted to CommGroup: the order does not descend.
    let err = registry.resolve("PartialOrder", &z5).unwrap_err();
    assert!(matches!(err, ResolutionError::CapabilityNotFound { .. }));

    // Other congruences on the same base do not match.
    let z3 = int.quotient("mod 3");
    assert!(registry.resolve("CommGroup", &z3).is_err());
}

#[test]
fn pullbacks_stay_inside_the_image() {
    let registry = standard_registry();
    samples::register_integers(&registry).unwrap();
    registry
        .register_rule(CompositionRule::pullback(samples::even_embedding()).only(["CommGroup"]))
        .unwrap();

    let even = SubjectType::named("Even");
    let group = registry.resolve("CommGroup", &even).unwrap();
    assert_eq!(
        group.call("mul", &[Value::Int(2), Value::Int(4)]).unwrap(),
        Value::Int(6)
    );
    assert_eq!(group.call("inv", &[Value::Int(2)]).unwrap(), Value::Int(-2));
    assert!(matches!(
        group.call("mul", &[Value::Int(3), Value::Int(2)]),
        Err(OpError::OutsideImage { .. })
    ));
}

#[test]
fn explain_lists_the_derivation_tree() {
    let registry = standard_registry();
    let z5 = samples::register_cyclic(&registry, 5).unwrap();
    let subject = z5.order_dual().additive();

    let steps = registry.explain("OrderedAddCommGroup", &subject).unwrap();
    let lines: Vec<String> = steps
        .iter()
        .map(|s| format!("{}{} ({})", "  ".repeat(s.depth), s.key, s.derivation))
        .collect();
    assert_eq!(
        lines,
        vec![
            "OrderedAddCommGroup on Additive(OrderDual(Z5)) (additive-twin rule 'additive-twin')",
            "  OrderedCommGroup on OrderDual(Z5) (order-dual rule 'order-dual')",
            "    OrderedCommGroup on Z5 (extension rule 'ordered-comm-group')",
            "      CommGroup on Z5 (primitive)",
            "      PartialOrder on Z5 (primitive)",
        ]
    );
}

#[test]
fn twin_dictionary_gaps_produce_invalid_records() {
    let config = RegistryConfig {
        twins: TwinDictionary::new(vec![
            TwinPair::new("mul", "add"),
            TwinPair::new("one", "zero"),
        ]),
        ..RegistryConfig::default()
    };
    let registry = Registry::with_config(config);
    Catalog::standard().unwrap().apply(&registry).unwrap();
    let z5 = samples::register_cyclic(&registry, 5).unwrap();

    // AddMonoid only needs add and zero.
    assert!(registry.resolve("AddMonoid", &z5.clone().additive()).is_ok());

    let err = registry
        .resolve("AddGroup", &z5.additive())
        .unwrap_err();
    match err {
        ResolutionError::InvalidRecord { rule, missing, .. } => {
            assert_eq!(rule, "additive-twin");
            assert_eq!(missing, "neg");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn catalog_and_config_from_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("structura.toml");
    std::fs::write(&config_path, "max_depth = 32\nauto_projection = true\n").unwrap();
    let catalog_path = dir.path().join("orders.toml");
    std::fs::write(
        &catalog_path,
        r#"
[catalog]
id = "orders"

[[capability]]
name = "Preorder"
operations = [{ name = "le", arity = 2, sort = "prop", duality = "flip" }]

[[capability]]
name = "PartialOrder"
extends = ["Preorder"]
axioms = ["le_antisymm"]

[[rule]]
kind = "product"
only = ["Preorder"]
"#,
    )
    .unwrap();

    let config = RegistryConfig::load(&config_path).unwrap();
    assert_eq!(config.max_depth, 32);
    let registry = Registry::with_config(config);
    let report = Catalog::load(&catalog_path)
        .unwrap()
        .apply(&registry)
        .unwrap();
    assert_eq!(report.capabilities, 2);
    assert_eq!(report.projections, 0);

    let int = SubjectType::named("Int");
    registry
        .register_primitive("PartialOrder", &int, samples::integer_lattice())
        .unwrap();

    // auto_projection made Preorder reachable from PartialOrder.
    let preorder = registry.resolve("Preorder", &int).unwrap();
    assert_eq!(
        preorder.call("le", &[Value::Int(1), Value::Int(2)]).unwrap(),
        Value::Bool(true)
    );
}
