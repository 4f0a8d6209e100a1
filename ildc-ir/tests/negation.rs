use ildc_ir::*;
use proptest::prelude::*;

fn var(index: u16, ty: TypeRef) -> Expression {
    Expression::VariableRef(Variable {
        index,
        name: format!("v{index}"),
        ty,
    })
}

fn comparison() -> impl Strategy<Value = BinaryOperator> {
    prop::sample::select(
        BinaryOperator::ALL
            .iter()
            .copied()
            .filter(|op| op.is_comparison())
            .collect::<Vec<_>>(),
    )
}

/// Atoms the comparison-to-zero rule produces: literals, boolean variables
/// and their negation, comparisons.
fn atom() -> impl Strategy<Value = Expression> {
    prop_oneof![
        any::<bool>().prop_map(Expression::boolean),
        (0u16..4).prop_map(|i| var(i, TypeRef::boolean())),
        (0u16..4).prop_map(|i| var(i, TypeRef::boolean()).negate()),
        (comparison(), 0u16..4, any::<i32>())
            .prop_map(|(op, i, k)| Expression::binary(op, var(i, TypeRef::int32()), Expression::int(k))),
    ]
}

fn condition() -> impl Strategy<Value = Expression> {
    atom().prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expression::and(a, b)),
            (inner.clone(), inner).prop_map(|(a, b)| Expression::or(a, b)),
        ]
    })
}

proptest! {
    #[test]
    fn double_negation_is_identity(e in condition()) {
        prop_assert_eq!(e.clone().negate().negate(), e);
    }

    #[test]
    fn negation_never_wraps_a_comparison(op in comparison(), k in any::<i32>()) {
        let e = Expression::binary(op, var(0, TypeRef::int32()), Expression::int(k));
        let negated = e.negate();
        prop_assert!(
            matches!(negated, Expression::Binary { op: flipped, .. } if flipped.is_comparison()),
            "negation should flip the operator"
        );
    }
}

#[test]
fn inverse_round_trips() {
    for op in BinaryOperator::ALL {
        if let Some(inverse) = op.inverse() {
            assert_eq!(inverse.inverse(), Some(op), "{op:?}");
            assert_ne!(inverse, op);
        }
    }
}

#[test]
fn arithmetic_has_no_inverse() {
    assert_eq!(BinaryOperator::Add.inverse(), None);
    assert_eq!(BinaryOperator::BitwiseAnd.inverse(), None);
}

#[test]
fn less_than_negates_to_greater_or_equal() {
    let e = Expression::binary(
        BinaryOperator::LessThan,
        var(0, TypeRef::int32()),
        var(1, TypeRef::int32()),
    );
    assert_eq!(
        e.negate(),
        Expression::binary(
            BinaryOperator::GreaterThanOrEqual,
            var(0, TypeRef::int32()),
            var(1, TypeRef::int32()),
        )
    );
}

#[test]
fn de_morgan_on_logical_operators() {
    let a = var(0, TypeRef::boolean());
    let b = var(1, TypeRef::boolean());
    let e = Expression::and(a.clone(), b.clone());
    assert_eq!(e.negate(), Expression::or(a.negate(), b.negate()));
}

#[test]
fn negated_call_is_wrapped_once() {
    let call = Expression::MethodInvocation {
        target: None,
        method: MethodRef::new(
            TypeRef::new("Demo.Sample"),
            "Ready",
            vec![],
            TypeRef::boolean(),
            false,
        ),
        arguments: vec![],
    };
    let negated = call.clone().negate();
    assert_eq!(negated, Expression::unary(UnaryOperator::BooleanNot, call.clone()));
    assert_eq!(negated.negate(), call);
}
