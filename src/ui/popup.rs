/// Popup UI: create, join or leave a room for the current tab

use yew::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::HtmlInputElement;
use patternfly_yew::prelude::*;
use std::rc::Rc;
use crate::background::{connect_background, ChromePort, RpcClient};
use crate::detection::ChromeDetector;
use crate::error::{SessionError, TransportError};
use crate::session::{Coordinator, Detection, Session};
use crate::store::{ChromeRoomStore, RoomStore, StoreConfig};

type PopupCoordinator = Coordinator<Rc<RpcClient<ChromePort>>, ChromeRoomStore, ChromeDetector>;

#[function_component(App)]
pub fn app() -> Html {
    let session = use_state(Session::new);
    let room_input = use_state(String::new);
    let join_error = use_state(|| None::<String>);

    let coordinator = {
        let session = session.clone();
        use_memo((), move |_| match connect(session) {
            Ok(coordinator) => Some(coordinator),
            Err(e) => {
                log::error!("Failed to connect to background: {}", e);
                None
            }
        })
    };

    // Follow the store and resolve the tab on mount
    {
        let coordinator = coordinator.clone();
        use_effect_with((), move |_| {
            if let Some(coordinator) = (*coordinator).clone() {
                let updates = coordinator.store().subscribe();
                let watcher = coordinator.clone();
                spawn_local(async move {
                    watcher.watch(updates).await;
                });
                spawn_local(async move {
                    // Failures are logged by the coordinator; the popup stays unresolved
                    let _ = coordinator.start().await;
                });
            }
            || ()
        });
    }

    let on_create = {
        let coordinator = coordinator.clone();
        Callback::from(move |_| {
            if let Some(coordinator) = (*coordinator).clone() {
                spawn_local(async move {
                    let _ = coordinator.create_room().await;
                });
            }
        })
    };

    let on_room_input = {
        let room_input = room_input.clone();
        Callback::from(move |e: InputEvent| {
            if let Some(input) = e.target_dyn_into::<HtmlInputElement>() {
                room_input.set(input.value());
            }
        })
    };

    let on_join = {
        let coordinator = coordinator.clone();
        let room_input = room_input.clone();
        let join_error = join_error.clone();
        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();
            let Some(coordinator) = (*coordinator).clone() else {
                return;
            };
            let code = (*room_input).clone();
            let join_error = join_error.clone();
            spawn_local(async move {
                match coordinator.join_room(&code).await {
                    Err(SessionError::Validation(e)) => join_error.set(Some(e.to_string())),
                    _ => join_error.set(None),
                }
            });
        })
    };

    let on_exit = {
        let coordinator = coordinator.clone();
        Callback::from(move |_| {
            if let Some(coordinator) = (*coordinator).clone() {
                spawn_local(async move {
                    let _ = coordinator.exit_room().await;
                });
            }
        })
    };

    let can_act = session.can_create_or_join();

    html! {
        <div class="padding-20 flex-column-gap">
            if let Some(room) = session.room_code() {
                <>
                <h1 class="popup-title">{format!("Room code: {}", room)}</h1>
                <Button onclick={on_exit} variant={ButtonVariant::Secondary} block={true}>
                    {"Exit"}
                </Button>
                {match session.detection() {
                    Some(Detection::Detecting) => html! {
                        <div class="loading-text-center">
                            <Spinner />
                            <p class="loading-text">{"Detecting the video..."}</p>
                        </div>
                    },
                    Some(Detection::Failed(message)) => html! {
                        <Alert r#type={AlertType::Danger} title={"Video not detected"} inline={true}>
                            {message.clone()}
                        </Alert>
                    },
                    _ => html! {}
                }}
                </>
            } else {
                <>
                <Button onclick={on_create} disabled={!can_act} variant={ButtonVariant::Primary} block={true}>
                    {"Create room"}
                </Button>
                <p>{"or"}</p>
                <p>{"Join room: "}</p>
                <form onsubmit={on_join}>
                    <input
                        class="pf-v5-c-form-control"
                        type="text"
                        placeholder="Room code"
                        value={(*room_input).clone()}
                        oninput={on_room_input}
                    />
                    if let Some(error) = (*join_error).clone() {
                        <p class="error-text" role="alert">{error}</p>
                    }
                    <input
                        class="pf-v5-c-button pf-m-secondary"
                        type="submit"
                        value="Join!"
                        disabled={!can_act}
                    />
                </form>
                </>
            }
        </div>
    }
}

fn connect(session: UseStateHandle<Session>) -> Result<Rc<PopupCoordinator>, TransportError> {
    let background = connect_background()?;
    let store = ChromeRoomStore::new(StoreConfig::default());

    let coordinator = Coordinator::new(background, store, ChromeDetector)
        .on_change(move |next| session.set(next.clone()));

    Ok(Rc::new(coordinator))
}
