use crate::delivery::resolver::PostalCodeResolver;

pub struct AppState {
    pub resolver: PostalCodeResolver,
}
