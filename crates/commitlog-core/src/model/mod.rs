pub mod change;
pub mod object_id;

pub use change::{
    AttributeChange, ObjectChange, ObjectChangeType, ToManyRelationshipChange,
    ToOneRelationshipChange,
};
pub use object_id::{IdKey, KeyValue, ObjectId};
