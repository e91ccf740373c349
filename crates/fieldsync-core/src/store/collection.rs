use std::fmt;

use crate::models::{DataType, OperationKind};

/// A logically independent set of records in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    FarmProfiles,
    CropData,
    WeatherCache,
    SatelliteCache,
    Recommendations,
    Achievements,
    Feedback,
    PendingOperations,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 9] = [
        Collection::FarmProfiles,
        Collection::CropData,
        Collection::WeatherCache,
        Collection::SatelliteCache,
        Collection::Recommendations,
        Collection::Achievements,
        Collection::Feedback,
        Collection::PendingOperations,
        Collection::Settings,
    ];

    /// File stem on disk. Changing one orphans existing data.
    pub fn file_stem(&self) -> &'static str {
        match self {
            Collection::FarmProfiles => "farm_profiles",
            Collection::CropData => "crop_data",
            Collection::WeatherCache => "weather_cache",
            Collection::SatelliteCache => "satellite_cache",
            Collection::Recommendations => "recommendations",
            Collection::Achievements => "achievements",
            Collection::Feedback => "feedback",
            Collection::PendingOperations => "pending_operations",
            Collection::Settings => "settings",
        }
    }

    /// Cache collection holding entries of a data type.
    pub fn for_data_type(data_type: &DataType) -> Option<Collection> {
        match data_type {
            DataType::Weather => Some(Collection::WeatherCache),
            DataType::SoilMoisture | DataType::VegetationIndex => Some(Collection::SatelliteCache),
            DataType::Unsupported(_) => None,
        }
    }

    /// Collection a mutation is written to locally.
    pub fn for_operation(kind: OperationKind) -> Collection {
        match kind {
            OperationKind::ProfileSave => Collection::FarmProfiles,
            OperationKind::CropDataUpdate => Collection::CropData,
            OperationKind::AchievementUnlock => Collection::Achievements,
            OperationKind::FeedbackSubmit => Collection::Feedback,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}
