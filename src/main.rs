#[rocket::launch]
fn rocket() -> _ {
    backoffice_api::rocket()
}
