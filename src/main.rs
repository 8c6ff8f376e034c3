#[rocket::launch]
fn rocket() -> _ {
    talkto::rocket()
}
