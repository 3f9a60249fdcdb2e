use futures::FutureExt;
use serde_json::json;
use sky_manager::{
    Error, Instance, ManagerConfig, MissingRowPolicy, Options, UnknownFieldPolicy,
    ValidationError,
};
use sky_manager_tests::Bootstrap;

async fn bootstrap() -> Bootstrap {
    Bootstrap::new().await.expect("Failed to bootstrap database")
}

async fn car(bootstrap: &Bootstrap, eager: &[&str]) -> Instance {
    bootstrap
        .manager
        .fetch("car", Some(json!({ "id": 1 })), eager, Options::default())
        .await
        .expect("Failed to fetch car")
        .into_one()
        .expect("Car #1 should exist")
}

fn member_names(instance: &Instance, relation: &str) -> Vec<String> {
    instance
        .related(relation)
        .and_then(|e| e.as_many())
        .map(|e| {
            e.iter()
                .filter_map(|e| e.get("name").and_then(|e| e.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_self_save_is_idempotent() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &["features", "color"]).await;
    let changes = bootstrap.changes().await.expect("changes");

    let saved = bootstrap
        .manager
        .save(car.clone(), None, Options::default())
        .await
        .expect("Failed to save car");

    assert_eq!(saved.to_json(), car.to_json());
    assert_eq!(bootstrap.changes().await.expect("changes"), changes);
}

#[tokio::test]
async fn test_fresh_instance_targets_existing_row() {
    let bootstrap = bootstrap().await;
    let manager = &bootstrap.manager;

    let car = manager
        .save(
            manager.forge("car").expect("Failed to forge car"),
            Some(json!({ "id": 1, "quantity": 7 })),
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    assert_eq!(car.id(), Some(&json!(1)));
    assert_eq!(car.get("quantity"), Some(&json!(7)));
    // columns left out of the patch are untouched
    assert_eq!(car.get("color_id"), Some(&json!(1)));
    assert_eq!(bootstrap.count("cars").await.expect("count"), 1);
}

#[tokio::test]
async fn test_nested_new_parent_is_inserted_and_linked() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &[]).await;

    let car = bootstrap
        .manager
        .save(car, Some(json!({ "color": { "name": "Red" } })), Options::default())
        .await
        .expect("Failed to save car");

    let color = car
        .related("color")
        .and_then(|e| e.as_one())
        .expect("Color should be cached");
    assert_eq!(color.id(), Some(&json!(3)));
    assert_eq!(car.get("color_id"), Some(&json!(3)));
    assert_eq!(bootstrap.count("colors").await.expect("count"), 3);
}

#[tokio::test]
async fn test_null_parent_clears_foreign_key() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &["color"]).await;

    let car = bootstrap
        .manager
        .save(car, Some(json!({ "color": null })), Options::default())
        .await
        .expect("Failed to save car");

    assert_eq!(car.get("color_id"), Some(&json!(null)));
    assert!(car.related("color").is_some_and(|e| e.is_empty()));
    assert_eq!(bootstrap.count("colors").await.expect("count"), 2);
}

#[tokio::test]
async fn test_changed_foreign_key_drops_cached_parent() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &["color", "model"]).await;

    let car = bootstrap
        .manager
        .save(car, Some(json!({ "color_id": 2 })), Options::default())
        .await
        .expect("Failed to save car");

    assert!(car.related("color").is_none());
    assert!(car.related("model").is_some());
}

#[tokio::test]
async fn test_replace_pivot_members_in_patch_order() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &["features"]).await;

    let car = bootstrap
        .manager
        .save(
            car,
            Some(json!({
                "features": [
                    { "id": 3, "_pivot_package": "Premium" },
                    { "id": 1 },
                    { "name": "Tow Hitch", "_pivot_package": "Utility" },
                ]
            })),
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    assert_eq!(
        member_names(&car, "features"),
        vec!["Sunroof", "GPS", "Tow Hitch"]
    );
    assert_eq!(bootstrap.count("cars_features").await.expect("count"), 3);
    assert_eq!(bootstrap.count("features").await.expect("count"), 4);

    let features = car
        .related("features")
        .and_then(|e| e.as_many())
        .expect("Features should be cached");
    // untouched pivot columns keep their stored value
    assert_eq!(
        features.at(1).and_then(|e| e.get("_pivot_package")),
        Some(&json!("Tech"))
    );
    assert_eq!(
        features.at(2).and_then(|e| e.get("_pivot_car_id")),
        Some(&json!(1))
    );

    let reloaded = bootstrap
        .manager
        .reload(&car, &["features"], Options::default())
        .await
        .expect("Failed to reload car");
    let packages = reloaded
        .related("features")
        .and_then(|e| e.as_many())
        .expect("Features should be loaded")
        .iter()
        .map(|e| e.get("_pivot_package").cloned())
        .collect::<Vec<_>>();
    assert_eq!(
        packages,
        vec![
            Some(json!("Tech")),
            Some(json!("Premium")),
            Some(json!("Utility"))
        ]
    );
}

#[tokio::test]
async fn test_pivot_extra_column_update() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &["features"]).await;
    let changes = bootstrap.changes().await.expect("changes");

    bootstrap
        .manager
        .save(
            car,
            Some(json!({
                "features": [
                    { "id": 1, "_pivot_package": "Tech" },
                    { "id": 2, "_pivot_package": "Winter" },
                ]
            })),
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    // only the one pivot row that differs is written
    assert_eq!(bootstrap.changes().await.expect("changes"), changes + 1);

    let car = car_after(&bootstrap).await;
    let features = car
        .related("features")
        .and_then(|e| e.as_many())
        .expect("Features should be loaded");
    assert_eq!(
        features.at(1).and_then(|e| e.get("_pivot_package")),
        Some(&json!("Winter"))
    );
}

async fn car_after(bootstrap: &Bootstrap) -> Instance {
    car(bootstrap, &["features"]).await
}

#[tokio::test]
async fn test_duplicate_pivot_members_collapse() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &[]).await;

    let car = bootstrap
        .manager
        .save(
            car,
            Some(json!({ "features": [{ "id": 1 }, { "id": 1 }] })),
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    assert_eq!(car.related("features").map(|e| e.len()), Some(2));
    assert_eq!(bootstrap.count("cars_features").await.expect("count"), 1);
}

#[tokio::test]
async fn test_has_many_orphans_are_detached() {
    let bootstrap = bootstrap().await;
    let manager = &bootstrap.manager;

    let make = manager
        .save(
            manager.forge("make").expect("Failed to forge make"),
            Some(json!({ "id": 1, "models": [{ "name": "X6" }] })),
            Options::default(),
        )
        .await
        .expect("Failed to save make");

    assert_eq!(member_names(&make, "models"), vec!["X6"]);
    assert_eq!(bootstrap.count("models").await.expect("count"), 2);

    let x5 = manager
        .fetch("model", Some(json!({ "name": "X5" })), &[], Options::default())
        .await
        .expect("Failed to fetch model")
        .into_one()
        .expect("X5 should still exist");
    assert_eq!(x5.get("make_id"), Some(&json!(null)));

    let x6 = manager
        .fetch("model", Some(json!({ "name": "X6" })), &[], Options::default())
        .await
        .expect("Failed to fetch model")
        .into_one()
        .expect("X6 should exist");
    assert_eq!(x6.get("make_id"), Some(&json!(1)));
}

#[tokio::test]
async fn test_has_many_orphans_are_deleted() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &["warranties"]).await;
    assert_eq!(car.related("warranties").map(|e| e.len()), Some(2));

    let car = bootstrap
        .manager
        .save(
            car,
            Some(json!({ "warranties": [{ "id": 2, "years": 6 }] })),
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    let warranty = car
        .related("warranties")
        .and_then(|e| e.as_many())
        .and_then(|e| e.at(0))
        .expect("Warranty should be cached");
    assert_eq!(warranty.get("years"), Some(&json!(6)));
    assert_eq!(warranty.get("car_id"), Some(&json!(1)));
    assert_eq!(bootstrap.count("warranties").await.expect("count"), 1);
}

#[tokio::test]
async fn test_unknown_key_is_rejected_without_writes() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &[]).await;
    let changes = bootstrap.changes().await.expect("changes");

    let result = bootstrap
        .manager
        .save(
            car,
            Some(json!({ "quantity": 5, "color": { "id": 1, "hue": "grey" } })),
            Options::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::UnknownField { ref entity, ref key }))
            if entity == "color" && key == "hue"
    ));
    assert_eq!(bootstrap.changes().await.expect("changes"), changes);
}

#[tokio::test]
async fn test_unknown_key_can_be_ignored() {
    let bootstrap = Bootstrap::with_config(ManagerConfig {
        unknown_fields: UnknownFieldPolicy::Ignore,
        ..ManagerConfig::default()
    })
    .await
    .expect("Failed to bootstrap database");
    let car = car(&bootstrap, &[]).await;

    let car = bootstrap
        .manager
        .save(
            car,
            Some(json!({ "quantity": 5, "wheels": 4 })),
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    assert_eq!(car.get("quantity"), Some(&json!(5)));
    assert!(car.get("wheels").is_none());
}

#[tokio::test]
async fn test_shape_mismatch() {
    let bootstrap = bootstrap().await;

    for patch in [
        json!({ "features": { "id": 1 } }),
        json!({ "features": [1, 2] }),
        json!({ "color": [{ "id": 1 }] }),
    ] {
        let result = bootstrap
            .manager
            .save(car(&bootstrap, &[]).await, Some(patch), Options::default())
            .await;

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::ShapeMismatch { .. }))
        ));
    }
}

#[tokio::test]
async fn test_constraint_violation_rolls_back() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &[]).await;

    let result = bootstrap
        .manager
        .save(
            car,
            Some(json!({
                "quantity": 9,
                "features": [{ "id": 1 }, { "name": "GPS" }]
            })),
            Options::default(),
        )
        .await;

    assert!(matches!(result, Err(Error::Constraint { ref table, .. }) if table == "features"));

    let car = car_after(&bootstrap).await;
    assert_eq!(car.get("quantity"), Some(&json!(1)));
    assert_eq!(car.related("features").map(|e| e.len()), Some(2));
    assert_eq!(bootstrap.count("features").await.expect("count"), 3);
}

#[tokio::test]
async fn test_cycle_is_rejected() {
    let bootstrap = bootstrap().await;
    let car = car(&bootstrap, &[]).await;

    let result = bootstrap
        .manager
        .save(
            car,
            Some(json!({
                "model": {
                    "id": 1,
                    "make": { "id": 1, "models": [{ "id": 1 }] }
                }
            })),
            Options::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::Cycle { ref entity, .. })) if entity == "model"
    ));
}

#[tokio::test]
async fn test_same_record_in_sibling_branches() {
    let bootstrap = bootstrap().await;
    let manager = &bootstrap.manager;

    let make = manager
        .save(
            manager.forge("make").expect("Failed to forge make"),
            Some(json!({
                "id": 1,
                "models": [{ "id": 1 }],
                "dealers": [{ "id": 1, "cars": [{ "id": 1, "model": { "id": 1 } }] }]
            })),
            Options::default(),
        )
        .await
        .expect("Failed to save make");

    assert_eq!(make.related("models").map(|e| e.len()), Some(1));
}

#[tokio::test]
async fn test_depth_limit() {
    let bootstrap = Bootstrap::with_config(ManagerConfig {
        max_depth: 1,
        ..ManagerConfig::default()
    })
    .await
    .expect("Failed to bootstrap database");
    let car = car(&bootstrap, &[]).await;

    let result = bootstrap
        .manager
        .save(
            car,
            Some(json!({ "model": { "id": 1, "type": { "id": 1 } } })),
            Options::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::DepthExceeded { limit: 1 }))
    ));
}

#[tokio::test]
async fn test_missing_row_policy() {
    let bootstrap = bootstrap().await;
    let manager = &bootstrap.manager;

    let color = manager
        .save(
            manager.forge("color").expect("Failed to forge color"),
            Some(json!({ "id": 10, "name": "Blue" })),
            Options::default(),
        )
        .await
        .expect("Failed to save color");
    assert_eq!(color.id(), Some(&json!(10)));

    let strict = Bootstrap::with_config(ManagerConfig {
        missing_rows: MissingRowPolicy::Fail,
        ..ManagerConfig::default()
    })
    .await
    .expect("Failed to bootstrap database");

    let result = strict
        .manager
        .save(
            strict.manager.forge("color").expect("Failed to forge color"),
            Some(json!({ "id": 10, "name": "Blue" })),
            Options::default(),
        )
        .await;

    assert!(matches!(result, Err(Error::NotFound { ref entity, .. }) if entity == "color"));
    assert_eq!(strict.count("colors").await.expect("count"), 2);
}

#[tokio::test]
async fn test_identity_is_immutable() {
    let bootstrap = bootstrap().await;
    let mut car = car(&bootstrap, &[]).await;

    assert!(matches!(
        car.set("id", 5),
        Err(Error::Validation(ValidationError::ImmutableIdentity { .. }))
    ));

    let result = bootstrap
        .manager
        .save(car, Some(json!({ "id": 5 })), Options::default())
        .await;

    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::ImmutableIdentity { .. }))
    ));
}

#[tokio::test]
async fn test_identity_compares_across_json_types() {
    let bootstrap = bootstrap().await;
    let mut car = car(&bootstrap, &[]).await;

    car.set("id", "1").expect("Same key as a string should be accepted");

    let car = bootstrap
        .manager
        .save(
            car,
            Some(json!({ "id": "1", "quantity": 4 })),
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    assert_eq!(car.get("quantity"), Some(&json!(4)));
    assert_eq!(bootstrap.count("cars").await.expect("count"), 1);
}

#[tokio::test]
async fn test_transaction_closure_rolls_back() {
    let bootstrap = bootstrap().await;
    let manager = bootstrap.manager.clone();

    let result = bootstrap
        .manager
        .transaction(move |connection| {
            async move {
                let car = manager
                    .fetch(
                        "car",
                        Some(json!({ "id": 1 })),
                        &[],
                        Options::transacting(&mut *connection),
                    )
                    .await?
                    .into_one()
                    .expect("Car #1 should exist");

                let car = manager
                    .save(
                        car,
                        Some(json!({ "quantity": 3 })),
                        Options::transacting(&mut *connection),
                    )
                    .await?;
                assert_eq!(car.get("quantity"), Some(&json!(3)));

                manager
                    .save(
                        car,
                        Some(json!({ "wheels": 4 })),
                        Options::transacting(&mut *connection),
                    )
                    .await
            }
            .boxed()
        })
        .await;

    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::UnknownField { .. }))
    ));
    assert_eq!(car_after(&bootstrap).await.get("quantity"), Some(&json!(1)));
}

#[tokio::test]
async fn test_large_integers_are_compared_exactly() {
    let bootstrap = bootstrap().await;
    let manager = &bootstrap.manager;

    for quantity in [9_007_199_254_740_992_i64, 9_007_199_254_740_993_i64] {
        let car = manager
            .save(
                manager.forge("car").expect("Failed to forge car"),
                Some(json!({ "id": 1, "quantity": quantity })),
                Options::default(),
            )
            .await
            .expect("Failed to save car");

        assert_eq!(car.get("quantity"), Some(&json!(quantity)));
    }

    assert_eq!(
        car_after(&bootstrap).await.get("quantity"),
        Some(&json!(9_007_199_254_740_993_i64))
    );
}
