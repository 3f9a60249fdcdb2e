use serde_json::json;
use sky_manager::{Error, Fetched, Options, ValidationError};
use sky_manager_tests::Bootstrap;

async fn bootstrap() -> Bootstrap {
    Bootstrap::new().await.expect("Failed to bootstrap database")
}

#[tokio::test]
async fn test_fetch_collection() {
    let Bootstrap { manager } = bootstrap().await;

    let fetched = manager
        .fetch("features", None, &[], Options::default())
        .await
        .expect("Failed to fetch features");
    assert!(matches!(fetched, Fetched::Many(_)));

    assert_eq!(
        fetched.to_json(),
        json!([
            { "id": 1, "name": "GPS" },
            { "id": 2, "name": "Heated Seats" },
            { "id": 3, "name": "Sunroof" },
        ])
    );
}

#[tokio::test]
async fn test_fetch_entity_returns_first_match() {
    let Bootstrap { manager } = bootstrap().await;

    let fetched = manager
        .fetch("color", None, &[], Options::default())
        .await
        .expect("Failed to fetch color");
    assert_eq!(fetched.to_json(), json!({ "id": 1, "name": "Grey" }));

    let missing = manager
        .fetch("color", Some(json!({ "name": "Purple" })), &[], Options::default())
        .await
        .expect("Failed to fetch color");
    assert!(matches!(missing, Fetched::One(None)));
    assert_eq!(missing.to_json(), json!(null));
}

#[tokio::test]
async fn test_fetch_null_criteria() {
    let Bootstrap { manager } = bootstrap().await;

    let make = manager.forge("make").expect("Failed to forge make");
    manager
        .save(
            make,
            Some(json!({ "id": 1, "models": [] })),
            Options::default(),
        )
        .await
        .expect("Failed to save make");

    let models = manager
        .fetch("models", Some(json!({ "make_id": null })), &[], Options::default())
        .await
        .expect("Failed to fetch models")
        .into_many();

    assert_eq!(models.len(), 1);
    assert_eq!(models[0].get("name"), Some(&json!("X5")));
}

#[tokio::test]
async fn test_fetch_nested_relations() {
    let Bootstrap { manager } = bootstrap().await;

    let dealer = manager
        .fetch(
            "dealer",
            Some(json!({ "id": 1 })),
            &["make", "cars.features", "cars.warranties"],
            Options::default(),
        )
        .await
        .expect("Failed to fetch dealer")
        .into_one()
        .expect("Dealer #1 should exist");

    assert_eq!(
        dealer.to_json(),
        json!({
            "id": 1,
            "name": "Houston BMW",
            "make_id": 1,
            "make": { "id": 1, "name": "BMW" },
            "cars": [{
                "id": 1,
                "quantity": 1,
                "dealer_id": 1,
                "model_id": 1,
                "color_id": 1,
                "features": [
                    {
                        "id": 1,
                        "name": "GPS",
                        "_pivot_car_id": 1,
                        "_pivot_feature_id": 1,
                        "_pivot_package": "Tech",
                    },
                    {
                        "id": 2,
                        "name": "Heated Seats",
                        "_pivot_car_id": 1,
                        "_pivot_feature_id": 2,
                        "_pivot_package": "Comfort",
                    },
                ],
                "warranties": [
                    { "id": 1, "years": 3, "car_id": 1 },
                    { "id": 2, "years": 5, "car_id": 1 },
                ],
            }],
        })
    );
}

#[tokio::test]
async fn test_fetch_missing_parent() {
    let Bootstrap { manager } = bootstrap().await;

    let car = manager
        .save(
            manager.forge("car").expect("Failed to forge car"),
            None,
            Options::default(),
        )
        .await
        .expect("Failed to save car");

    let car = manager
        .reload(&car, &["color", "features"], Options::default())
        .await
        .expect("Failed to reload car");

    assert!(car.related("color").is_some_and(|e| e.is_empty()));
    assert!(car.related("features").is_some_and(|e| e.is_empty()));
    assert_eq!(car.to_json()["color"], json!(null));
    assert_eq!(car.to_json()["features"], json!([]));
}

#[tokio::test]
async fn test_fetch_unknown_names() {
    let Bootstrap { manager } = bootstrap().await;

    let result = manager
        .fetch("boat", None, &[], Options::default())
        .await;
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::UnknownEntity(ref name))) if name == "boat"
    ));

    let result = manager
        .fetch("car", Some(json!({ "wheels": 4 })), &[], Options::default())
        .await;
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::UnknownField { ref key, .. })) if key == "wheels"
    ));

    let result = manager
        .fetch("car", None, &["model.engine"], Options::default())
        .await;
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::UnknownRelation { ref relation, .. }))
            if relation == "engine"
    ));

    let result = manager
        .fetch("car", Some(json!([1])), &[], Options::default())
        .await;
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::NotAnObject { .. }))
    ));
}

#[tokio::test]
async fn test_reload_deleted_row() {
    let bootstrap = bootstrap().await;
    let manager = &bootstrap.manager;

    let car = manager
        .fetch("car", Some(json!({ "id": 1 })), &["warranties"], Options::default())
        .await
        .expect("Failed to fetch car")
        .into_one()
        .expect("Car #1 should exist");
    let warranty = car
        .related("warranties")
        .and_then(|e| e.as_many())
        .and_then(|e| e.at(0))
        .cloned()
        .expect("Car #1 should have warranties");

    manager
        .save(car, Some(json!({ "warranties": [] })), Options::default())
        .await
        .expect("Failed to save car");

    let result = manager.reload(&warranty, &[], Options::default()).await;
    assert!(matches!(result, Err(Error::NotFound { ref entity, .. }) if entity == "warranty"));

    let unsaved = manager.forge("warranty").expect("Failed to forge warranty");
    let result = manager.reload(&unsaved, &[], Options::default()).await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
}
