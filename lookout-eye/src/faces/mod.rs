//! Face identity: storage, matching and enrollment

pub mod gate;
pub mod stage;
pub mod store;

pub use gate::{face_signature, EnrollmentGate};
pub use stage::{
    EnrollmentAnswer, EnrollmentPort, EnrollmentRequest, FaceIdentity, FaceObservation, FaceStage,
};
pub use store::{FaceMatch, FaceStore, Person};
