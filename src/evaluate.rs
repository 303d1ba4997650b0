use crate::database::Database;
use crate::features::FeatureStore;
use crate::model::{FeatureBatch, PointsRegressor};
use crate::util::Accuracy;
use tracing::{info, instrument, trace};

/// Replays every historical row through the points regressor with the features it would
/// have seen at training time. Rows the encoders cannot place are skipped.
#[instrument(skip_all, fields(records = database.records.len()))]
pub fn evaluate(
    points: &PointsRegressor,
    features: &FeatureStore,
    database: &Database,
) -> Accuracy {
    let mut accuracy = Accuracy::default();
    let mut batch = FeatureBatch::with_capacity(database.records.len());
    let mut expected = Vec::with_capacity(database.records.len());

    for record in &database.records {
        let driver = points.encode_driver(&record.driver);
        let constructor = points.encode_constructor(&record.constructor);
        if let (Ok(driver), Ok(constructor)) = (driver, constructor) {
            batch.push(features.training_row(record), driver, constructor);
            expected.push(record.points);
        } else {
            trace!(
                driver = %record.driver,
                constructor = %record.constructor,
                "skipping unencodable row"
            );
            accuracy.skip();
        }
    }

    for (expected, actual) in expected.into_iter().zip(points.predict(&batch)) {
        accuracy.record(expected, actual);
    }
    info!(
        rows = accuracy.len(),
        skipped = accuracy.skipped(),
        within_half_point = accuracy.correct(),
        "evaluation complete"
    );
    accuracy
}
