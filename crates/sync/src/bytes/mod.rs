mod dictionary;
mod error;
mod serializer;

pub use dictionary::SerializationDictionary;
pub use error::DeserializeError;
pub use serializer::{
    CURRENT_VERSION, Deserializer, Serializable, Serializer, SerializerOptions,
};
